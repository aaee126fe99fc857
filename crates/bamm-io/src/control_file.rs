//! Control-file parser: `key = value` lines, `#` comments, blank lines
//! ignored, duplicate and unrecognised keys fatal. Produces the validated,
//! immutable `bamm_core::Config` record — `bamm-core` never parses a
//! control file itself.

use std::collections::HashMap;

use bamm_core::config::{
    InitialRegime, ModelType, NodeEValueSource, OutputPaths, Priors, ProposalScales, ProposalWeights,
    WriteFrequencies,
};
use bamm_core::Config;

use crate::error::ConfigError;

const KEYS: &[&str] = &[
    "modeltype",
    "treefile",
    "traitfile",
    "sampleProbsFilename",
    "globalSamplingFraction",
    "useGlobalSamplingProbability",
    "numberGenerations",
    "seed",
    "poissonRatePrior",
    "lambdaInitPrior",
    "lambdaShiftPrior",
    "muInitPrior",
    "muShiftPrior",
    "betaInitPrior",
    "betaShiftPrior",
    "lambdaInit0",
    "lambdaShift0",
    "muInit0",
    "muShift0",
    "betaInit",
    "betaShiftInit",
    "updateEventLocationScale",
    "updateEventRateScale",
    "updateLambdaInitScale",
    "updateLambdaShiftScale",
    "updateMuInitScale",
    "updateMuShiftScale",
    "updateBetaScale",
    "updateBetaShiftScale",
    "updateNodeStateScale",
    "updateRateEventNumber",
    "updateRateEventPosition",
    "updateRateEventRate",
    "updateRateLambda0",
    "updateRateLambdaShift",
    "updateRateMu0",
    "updateRateMuShift",
    "updateRateBeta0",
    "updateRateBetaShift",
    "updateRateNodeState",
    "localGlobalMoveRatio",
    "segLength",
    "initialNumberEvents",
    "loadEventData",
    "eventDataInfile",
    "minCladeSizeForShift",
    "sampleFromPriorOnly",
    "conditionOnSurvival",
    "adaptiveProposal",
    "nodeEValueSource",
    "autotune",
    "mcmcWriteFreq",
    "eventDataWriteFreq",
    "printFreq",
    "acceptWriteFreq",
    "branchRatesWriteFreq",
    "outName",
    "mcmcOutfile",
    "eventDataOutfile",
    "branchRatesOutfile",
];

struct Fields {
    path: String,
    values: HashMap<String, (String, usize)>,
}

impl Fields {
    fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|(v, _)| v.as_str())
    }

    fn str_or(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    fn opt_str(&self, key: &str) -> Option<String> {
        self.raw(key).map(|s| s.to_string())
    }

    fn required_str(&self, key: &'static str) -> Result<String, ConfigError> {
        self.raw(key).map(|s| s.to_string()).ok_or(ConfigError::MissingKey(key))
    }

    fn f64_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::NotNumeric(key.to_string(), v.to_string())),
        }
    }

    fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::NotNumeric(key.to_string(), v.to_string())),
        }
    }

    fn i64_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| ConfigError::NotNumeric(key.to_string(), v.to_string())),
        }
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" => Ok(true),
                "0" | "false" | "f" | "no" => Ok(false),
                _ => Err(ConfigError::NotBoolean(key.to_string(), v.to_string())),
            },
        }
    }
}

/// Parse `input` (the full contents of a control file) into a validated
/// [`Config`]. `path` is used only to label error messages.
pub fn parse(path: &str, input: &str) -> Result<Config, ConfigError> {
    let mut values: HashMap<String, (String, usize)> = HashMap::new();
    for (i, raw_line) in input.lines().enumerate() {
        let lineno = i + 1;
        let line = match raw_line.find('#') {
            Some(p) => &raw_line[..p],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let eq = line
            .find('=')
            .ok_or_else(|| ConfigError::MalformedLine(path.to_string(), lineno, line.to_string()))?;
        let key = line[..eq].trim().to_string();
        let value = line[eq + 1..].trim().to_string();

        if !KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(path.to_string(), lineno, key));
        }
        if let Some((_, first_lineno)) = values.get(&key) {
            return Err(ConfigError::DuplicateKey(key, *first_lineno, lineno));
        }
        values.insert(key, (value, lineno));
    }

    let fields = Fields { path: path.to_string(), values };
    build(&fields)
}

fn build(f: &Fields) -> Result<Config, ConfigError> {
    let model_type = match f.required_str("modeltype")?.to_ascii_lowercase().as_str() {
        "speciationextinction" | "diversification" => ModelType::Diversification,
        "trait" => ModelType::Trait,
        other => return Err(ConfigError::UnknownModelType("modeltype".to_string(), other.to_string())),
    };

    let seed_raw = f.i64_or("seed", -1)?;
    let seed = if seed_raw < 0 { None } else { Some(seed_raw as u64) };

    let node_e_value_source = match f.str_or("nodeEValueSource", "left").to_ascii_lowercase().as_str() {
        "left" => NodeEValueSource::LeftChild,
        "right" => NodeEValueSource::RightChild,
        other => {
            return Err(ConfigError::InvalidValue("nodeEValueSource".to_string(), other.to_string()));
        }
    };

    Ok(Config {
        model_type,
        treefile: f.required_str("treefile")?,
        traitfile: f.opt_str("traitfile"),

        use_global_sampling_probability: f.bool_or("useGlobalSamplingProbability", true)?,
        global_sampling_fraction: f.f64_or("globalSamplingFraction", 1.0)?,
        sample_probs_filename: f.opt_str("sampleProbsFilename"),

        number_generations: f.u64_or("numberGenerations", 0)?,
        seed,

        priors: Priors {
            poisson_rate_prior: f.f64_or("poissonRatePrior", 1.0)?,
            lambda_init_prior: f.f64_or("lambdaInitPrior", 1.0)?,
            lambda_shift_prior: f.f64_or("lambdaShiftPrior", 1.0)?,
            mu_init_prior: f.f64_or("muInitPrior", 1.0)?,
            mu_shift_prior: f.f64_or("muShiftPrior", 1.0)?,
            beta_init_prior: f.f64_or("betaInitPrior", 1.0)?,
            beta_shift_prior: f.f64_or("betaShiftPrior", 1.0)?,
        },
        initial_regime: InitialRegime {
            lambda_init0: f.f64_or("lambdaInit0", 0.1)?,
            lambda_shift0: f.f64_or("lambdaShift0", 0.0)?,
            mu_init0: f.f64_or("muInit0", 0.05)?,
            mu_shift0: f.f64_or("muShift0", 0.0)?,
            beta_init0: f.f64_or("betaInit", 0.1)?,
            beta_shift_init0: f.f64_or("betaShiftInit", 0.0)?,
        },
        scales: ProposalScales {
            event_location_scale: f.f64_or("updateEventLocationScale", 1.0)?,
            event_rate_scale: f.f64_or("updateEventRateScale", 1.0)?,
            lambda_init_scale: f.f64_or("updateLambdaInitScale", 1.0)?,
            lambda_shift_scale: f.f64_or("updateLambdaShiftScale", 1.0)?,
            mu_init_scale: f.f64_or("updateMuInitScale", 1.0)?,
            mu_shift_scale: f.f64_or("updateMuShiftScale", 1.0)?,
            beta_scale: f.f64_or("updateBetaScale", 1.0)?,
            beta_shift_scale: f.f64_or("updateBetaShiftScale", 1.0)?,
            node_state_scale: f.f64_or("updateNodeStateScale", 1.0)?,
        },
        weights: ProposalWeights {
            birth_death: f.f64_or("updateRateEventNumber", 1.0)?,
            event_relocation: f.f64_or("updateRateEventPosition", 1.0)?,
            event_rate: f.f64_or("updateRateEventRate", 1.0)?,
            lambda_init: f.f64_or("updateRateLambda0", 1.0)?,
            lambda_shift: f.f64_or("updateRateLambdaShift", 1.0)?,
            mu_init: f.f64_or("updateRateMu0", 1.0)?,
            mu_shift: f.f64_or("updateRateMuShift", 1.0)?,
            beta_init: f.f64_or("updateRateBeta0", 1.0)?,
            beta_shift: f.f64_or("updateRateBetaShift", 1.0)?,
            node_state: f.f64_or("updateRateNodeState", 1.0)?,
        },

        local_global_move_ratio: f.f64_or("localGlobalMoveRatio", 10.0)?,
        seg_length: f.f64_or("segLength", 0.01)?,

        initial_number_events: f.u64_or("initialNumberEvents", 0)? as u32,
        load_event_data: f.bool_or("loadEventData", false)?,
        event_data_infile: f.opt_str("eventDataInfile"),

        min_clade_size_for_shift: f.u64_or("minCladeSizeForShift", 1)? as u32,
        sample_from_prior_only: f.bool_or("sampleFromPriorOnly", false)?,
        condition_on_survival: f.bool_or("conditionOnSurvival", true)?,
        adaptive_proposal: f.bool_or("adaptiveProposal", false)?,
        node_e_value_source,

        autotune: f.bool_or("autotune", false)?,

        write_freq: WriteFrequencies {
            mcmc_write_freq: f.u64_or("mcmcWriteFreq", 0)?,
            event_data_write_freq: f.u64_or("eventDataWriteFreq", 0)?,
            print_freq: f.u64_or("printFreq", 0)?,
            accept_write_freq: f.u64_or("acceptWriteFreq", 0)?,
            branch_rates_write_freq: f.u64_or("branchRatesWriteFreq", 0)?,
        },
        outputs: OutputPaths {
            out_name: f.str_or("outName", &f.path),
            mcmc_outfile: f.str_or("mcmcOutfile", "mcmc_out.txt"),
            event_data_outfile: f.str_or("eventDataOutfile", "event_data.txt"),
            branch_rates_outfile: f.str_or("branchRatesOutfile", "branch_rates.txt"),
        },
    })
}
