//! The reversible-jump birth/death kernel: the mechanism that lets the
//! number of rate-shift events itself be inferred. Grounded on
//! `changeNumberOfEventsMH`/`addEventToTree`/`deleteRandomEventFromTree`
//! in the original sampler, which draws gain-vs-loss 50/50 (forcing a gain
//! when the event set is empty) and computes a single Metropolis-Hastings
//! ratio covering the prior on event count, the proposal asymmetry at the
//! K=0/K=1 boundary, and the density of whatever regime values were
//! drawn or discarded.

use crate::config::ModelType;
use crate::error::ModelError;
use crate::event::{BranchEvent, DiversificationParams, EventId, Regime, TraitParams};
use crate::model::Model;
use crate::tree::{NodeId, Tree};
use bamm_traits::RandomSource;

pub fn propose<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let k = model.event_count();
    let do_birth = k == 0 || model.rng.uniform() < 0.5;
    if do_birth {
        birth(model)
    } else {
        death(model)
    }
}

/// The event (if any) currently governing map position `x` on `node`'s
/// branch, found by walking this branch's own events tipward-to-rootward
/// and falling back to the branch's ancestral event.
fn governing_event_at(
    tree: &Tree,
    histories: &crate::history::BranchHistories,
    root_event: EventId,
    node: NodeId,
    x: f64,
) -> EventId {
    let hist = histories.branch(node);
    for &(id, map_time) in hist.events().iter().rev() {
        if map_time <= x {
            return id;
        }
    }
    hist.ancestral_node_event.unwrap_or(root_event)
}

enum RegimeSource<'a> {
    Draw,
    Evaluate(&'a Regime),
}

/// Either draw a fresh regime from the (possibly locally-centred) drawing
/// distribution, or evaluate the density of an existing one under that
/// same distribution — the two directions of the same reversible jump.
fn regime_and_density<R: RandomSource>(
    model: &mut Model<R>,
    governing: EventId,
    source: RegimeSource,
) -> (Regime, f64) {
    match model.config.model_type {
        ModelType::Diversification => {
            let local = *model
                .events
                .get(governing)
                .regime
                .as_diversification()
                .expect("diversification model requires diversification regimes");
            let (li_rate, mi_rate) = if model.config.adaptive_proposal {
                (1.0 / local.lambda_init.max(1e-8), 1.0 / local.mu_init.max(1e-8))
            } else {
                (model.config.priors.lambda_init_prior, model.config.priors.mu_init_prior)
            };
            let p = match source {
                RegimeSource::Draw => DiversificationParams {
                    lambda_init: model.rng.exponential(li_rate),
                    lambda_shift: model.rng.normal(0.0, model.config.priors.lambda_shift_prior),
                    mu_init: model.rng.exponential(mi_rate),
                    mu_shift: model.rng.normal(0.0, model.config.priors.mu_shift_prior),
                },
                RegimeSource::Evaluate(r) => *r.as_diversification().expect("diversification regime"),
            };
            let ln_density = model.rng.ln_exponential_pdf(li_rate, p.lambda_init)
                + model
                    .rng
                    .ln_normal_pdf(0.0, model.config.priors.lambda_shift_prior, p.lambda_shift)
                + model.rng.ln_exponential_pdf(mi_rate, p.mu_init)
                + model
                    .rng
                    .ln_normal_pdf(0.0, model.config.priors.mu_shift_prior, p.mu_shift);
            (Regime::Diversification(p), ln_density)
        }
        ModelType::Trait => {
            let local = *model
                .events
                .get(governing)
                .regime
                .as_trait()
                .expect("trait model requires trait regimes");
            let bi_rate = if model.config.adaptive_proposal {
                1.0 / local.beta_init.max(1e-8)
            } else {
                model.config.priors.beta_init_prior
            };
            let p = match source {
                RegimeSource::Draw => TraitParams {
                    beta_init: model.rng.exponential(bi_rate),
                    beta_shift: model.rng.normal(0.0, model.config.priors.beta_shift_prior),
                },
                RegimeSource::Evaluate(r) => *r.as_trait().expect("trait regime"),
            };
            let ln_density = model.rng.ln_exponential_pdf(bi_rate, p.beta_init)
                + model
                    .rng
                    .ln_normal_pdf(0.0, model.config.priors.beta_shift_prior, p.beta_shift);
            (Regime::Trait(p), ln_density)
        }
    }
}

fn birth<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let k = model.event_count();
    let total_map = model.tree.total_map_length();
    let x = model.rng.uniform() * total_map;
    let node = model
        .tree
        .inverse_map(x)
        .expect("a uniform draw within [0, total_map_length) always resolves to a branch");

    if model.tree.node(node).clade_size < model.config.min_clade_size_for_shift {
        return Ok(false);
    }

    let governing = governing_event_at(&model.tree, &model.histories, model.root_event, node, x);
    let (regime, log_q_jump) = regime_and_density(model, governing, RegimeSource::Draw);

    let old_ll = model.current_log_likelihood;
    let old_lp = model.current_log_prior;

    let event_id = model.events.insert(BranchEvent {
        attach_node: node,
        map_time: x,
        regime,
        is_time_variable: true,
    });
    model.histories.insert_event(&model.tree, node, event_id, x);

    if !model.histories.is_valid_configuration(&model.tree, node) {
        model.histories.remove_event(&model.tree, node, event_id)?;
        model.events.remove(event_id);
        return Ok(false);
    }

    let new_ll = model.recompute_log_likelihood();
    let new_lp = model.recompute_log_prior();

    let log_qratio = if k == 0 { 0.5_f64.ln() } else { 0.0 };
    let log_alpha = (new_ll - old_ll) + (new_lp - old_lp) + model.event_rate.ln() - ((k + 1) as f64).ln()
        + log_qratio
        - log_q_jump;

    if model.accept_metropolis_hastings(log_alpha) {
        model.current_log_likelihood = new_ll;
        model.current_log_prior = new_lp;
        Ok(true)
    } else {
        model.histories.remove_event(&model.tree, node, event_id)?;
        model.events.remove(event_id);
        Ok(false)
    }
}

fn death<R: RandomSource>(model: &mut Model<R>) -> Result<bool, ModelError> {
    let ids = model.events.non_root_ids(model.root_event);
    if ids.is_empty() {
        return Ok(false);
    }
    let k = ids.len();
    let event_id = ids[model.rng.sample_index(k)];
    let saved = model.events.get(event_id).clone();

    let old_ll = model.current_log_likelihood;
    let old_lp = model.current_log_prior;

    model.histories.remove_event(&model.tree, saved.attach_node, event_id)?;
    model.events.remove(event_id);

    let governing =
        governing_event_at(&model.tree, &model.histories, model.root_event, saved.attach_node, saved.map_time);
    let (_, log_q_jump) = regime_and_density(model, governing, RegimeSource::Evaluate(&saved.regime));

    let new_ll = model.recompute_log_likelihood();
    let new_lp = model.recompute_log_prior();

    let log_qratio = if k == 1 { 2.0_f64.ln() } else { 0.0 };
    let log_alpha =
        (new_ll - old_ll) + (new_lp - old_lp) + (k as f64).ln() - model.event_rate.ln() + log_qratio + log_q_jump;

    if model.accept_metropolis_hastings(log_alpha) {
        model.current_log_likelihood = new_ll;
        model.current_log_prior = new_lp;
        Ok(true)
    } else {
        let restored = model.events.insert(saved.clone());
        model
            .histories
            .insert_event(&model.tree, saved.attach_node, restored, saved.map_time);
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::tree::test_trees::three_tip;
    use bamm_rng::BammRng;

    fn test_config() -> Config {
        Config {
            model_type: ModelType::Diversification,
            treefile: String::new(),
            traitfile: None,
            use_global_sampling_probability: true,
            global_sampling_fraction: 1.0,
            sample_probs_filename: None,
            number_generations: 1000,
            seed: Some(3),
            priors: Priors {
                poisson_rate_prior: 1.0,
                lambda_init_prior: 1.0,
                lambda_shift_prior: 1.0,
                mu_init_prior: 1.0,
                mu_shift_prior: 1.0,
                beta_init_prior: 1.0,
                beta_shift_prior: 1.0,
            },
            initial_regime: InitialRegime {
                lambda_init0: 0.2,
                lambda_shift0: 0.0,
                mu_init0: 0.05,
                mu_shift0: 0.0,
                beta_init0: 1.0,
                beta_shift_init0: 0.0,
            },
            scales: ProposalScales {
                event_location_scale: 0.1,
                event_rate_scale: 1.0,
                lambda_init_scale: 1.0,
                lambda_shift_scale: 1.0,
                mu_init_scale: 1.0,
                mu_shift_scale: 1.0,
                beta_scale: 1.0,
                beta_shift_scale: 1.0,
                node_state_scale: 1.0,
            },
            weights: ProposalWeights {
                birth_death: 1.0,
                event_relocation: 0.0,
                event_rate: 0.0,
                lambda_init: 0.0,
                lambda_shift: 0.0,
                mu_init: 0.0,
                mu_shift: 0.0,
                beta_init: 0.0,
                beta_shift: 0.0,
                node_state: 0.0,
            },
            local_global_move_ratio: 1.0,
            seg_length: 0.05,
            initial_number_events: 0,
            load_event_data: false,
            event_data_infile: None,
            min_clade_size_for_shift: 1,
            sample_from_prior_only: false,
            condition_on_survival: true,
            adaptive_proposal: false,
            node_e_value_source: NodeEValueSource::LeftChild,
            autotune: false,
            write_freq: WriteFrequencies {
                mcmc_write_freq: 1,
                event_data_write_freq: 1,
                print_freq: 1,
                accept_write_freq: 1,
                branch_rates_write_freq: 1,
            },
            outputs: OutputPaths {
                out_name: "run".into(),
                mcmc_outfile: "run_mcmc_out.txt".into(),
                event_data_outfile: "run_event_data.txt".into(),
                branch_rates_outfile: "run_branch_rates.txt".into(),
            },
        }
    }

    #[test]
    fn birth_then_death_is_possible_and_preserves_i2() {
        let tree = three_tip();
        let config = test_config();
        let rng = BammRng::seed_from_u64(42);
        let mut model = Model::new(tree, config, rng, Vec::new(), Vec::new()).unwrap();
        for _ in 0..500 {
            model.step().unwrap();
            assert!(model.histories.check_i2(&model.tree));
            assert!(model.log_likelihood().is_finite() || model.event_count() == 0);
        }
    }

    #[test]
    fn min_clade_size_rejects_births_on_small_clades() {
        let tree = three_tip();
        let mut config = test_config();
        config.min_clade_size_for_shift = 10; // larger than any clade in this tree
        let rng = BammRng::seed_from_u64(5);
        let mut model = Model::new(tree, config, rng, Vec::new(), Vec::new()).unwrap();
        for _ in 0..50 {
            model.step().unwrap();
        }
        assert_eq!(model.event_count(), 0);
    }
}
