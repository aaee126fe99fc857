//! The validated, immutable run configuration.
//!
//! `bamm-io::control_file` parses the on-disk key=value file into this
//! struct; `bamm-core` never reads a control file itself, keeping file
//! format parsing layered strictly on top of the model's own types.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Diversification,
    Trait,
}

/// The relative weights the categorical proposal-kernel draw in
/// `Model::step` uses. Weights need not sum to 1; they are
/// normalised at draw time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProposalWeights {
    pub birth_death: f64,
    pub event_relocation: f64,
    pub event_rate: f64,
    pub lambda_init: f64,
    pub lambda_shift: f64,
    pub mu_init: f64,
    pub mu_shift: f64,
    pub beta_init: f64,
    pub beta_shift: f64,
    pub node_state: f64,
}

impl ProposalWeights {
    pub fn total(&self, model_type: ModelType) -> f64 {
        let common = self.birth_death + self.event_relocation + self.event_rate;
        match model_type {
            ModelType::Diversification => {
                common + self.lambda_init + self.lambda_shift + self.mu_init + self.mu_shift
            }
            ModelType::Trait => common + self.beta_init + self.beta_shift + self.node_state,
        }
    }
}

/// Prior hyperparameters, shared across both likelihood models (unused
/// fields for the active model are simply never consulted).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Priors {
    pub poisson_rate_prior: f64,
    pub lambda_init_prior: f64,
    pub lambda_shift_prior: f64,
    pub mu_init_prior: f64,
    pub mu_shift_prior: f64,
    pub beta_init_prior: f64,
    pub beta_shift_prior: f64,
}

/// Initial regime values assigned to the root event at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InitialRegime {
    pub lambda_init0: f64,
    pub lambda_shift0: f64,
    pub mu_init0: f64,
    pub mu_shift0: f64,
    pub beta_init0: f64,
    pub beta_shift_init0: f64,
}

/// Proposal step sizes (`update*Scale` keys).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProposalScales {
    pub event_location_scale: f64,
    pub event_rate_scale: f64,
    pub lambda_init_scale: f64,
    pub lambda_shift_scale: f64,
    pub mu_init_scale: f64,
    pub mu_shift_scale: f64,
    pub beta_scale: f64,
    pub beta_shift_scale: f64,
    pub node_state_scale: f64,
}

/// Output cadences, measured in generations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteFrequencies {
    pub mcmc_write_freq: u64,
    pub event_data_write_freq: u64,
    pub print_freq: u64,
    pub accept_write_freq: u64,
    pub branch_rates_write_freq: u64,
}

/// Output file paths, relative to the working directory unless absolute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub out_name: String,
    pub mcmc_outfile: String,
    pub event_data_outfile: String,
    pub branch_rates_outfile: String,
}

/// The complete, validated run configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub model_type: ModelType,
    pub treefile: String,
    pub traitfile: Option<String>,

    pub use_global_sampling_probability: bool,
    pub global_sampling_fraction: f64,
    pub sample_probs_filename: Option<String>,

    pub number_generations: u64,
    /// `-1` in the control file means "derive from the OS entropy source";
    /// represented here as `None`.
    pub seed: Option<u64>,

    pub priors: Priors,
    pub initial_regime: InitialRegime,
    pub scales: ProposalScales,
    pub weights: ProposalWeights,

    pub local_global_move_ratio: f64,
    pub seg_length: f64,

    pub initial_number_events: u32,
    pub load_event_data: bool,
    pub event_data_infile: Option<String>,

    pub min_clade_size_for_shift: u32,
    pub sample_from_prior_only: bool,
    pub condition_on_survival: bool,
    /// Opt-in "adaptive" birth proposal that centres new regime draws on
    /// the current local rate instead of the prior. Off by default.
    pub adaptive_proposal: bool,
    /// Which child's extinction probability is propagated upward at an
    /// internal node. The choice is otherwise arbitrary.
    pub node_e_value_source: NodeEValueSource,

    pub autotune: bool,

    pub write_freq: WriteFrequencies,
    pub outputs: OutputPaths,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEValueSource {
    LeftChild,
    RightChild,
}

impl Config {
    /// `localMoveProb = localGlobalMoveRatio / (1 + localGlobalMoveRatio)`.
    pub fn local_move_prob(&self) -> f64 {
        self.local_global_move_ratio / (1.0 + self.local_global_move_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProposalWeights {
        ProposalWeights {
            birth_death: 1.0,
            event_relocation: 1.0,
            event_rate: 1.0,
            lambda_init: 1.0,
            lambda_shift: 1.0,
            mu_init: 1.0,
            mu_shift: 1.0,
            beta_init: 0.0,
            beta_shift: 0.0,
            node_state: 0.0,
        }
    }

    #[test]
    fn diversification_total_excludes_trait_weights() {
        let w = sample();
        assert_eq!(w.total(ModelType::Diversification), 6.0);
    }

    #[test]
    fn local_move_prob_matches_formula() {
        let cfg_ratio = 3.0_f64;
        assert!((cfg_ratio / (1.0 + cfg_ratio) - 0.75).abs() < 1e-12);
    }
}
