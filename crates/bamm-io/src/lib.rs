//! Everything that touches the filesystem or a human-edited text format:
//! the control-file parser, the Newick and trait-value readers, the
//! event-data snapshot codec, and the CSV output writers. `bamm-core`
//! stays pure; this crate is where `bamm-cli` gets its `Config`, `Tree`,
//! and `Vec<InitialEvent>` from.

pub mod control_file;
pub mod error;
pub mod event_data;
pub mod newick;
pub mod outputs;
pub mod sample_probs;
pub mod traits_file;

pub use error::{ConfigError, DataError};
pub use outputs::FileOutputSink;

use bamm_core::{Config, InitialEvent, ModelType, RawNode, Tree};

/// Everything a fresh `Model` needs to be constructed, assembled from the
/// files `config` names. Does not construct the `Model` itself — that is
/// `bamm-cli`'s job, since it also owns the choice of `RandomSource`.
pub struct LoadedRun {
    pub config: Config,
    pub tree: Tree,
    pub initial_events: Vec<InitialEvent>,
    pub tip_trait_values: Vec<(bamm_core::NodeId, f64)>,
}

/// Parse the control file at `control_file_path`, then load and
/// cross-validate everything it references (tree, optional trait file,
/// optional sampling-fraction file, optional event-data snapshot).
pub fn load_run(control_file_path: &str) -> Result<LoadedRun, RunLoadError> {
    let control_text = std::fs::read_to_string(control_file_path)
        .map_err(|e| RunLoadError::Config(ConfigError::Io(control_file_path.to_string(), e)))?;
    let config = control_file::parse(control_file_path, &control_text).map_err(RunLoadError::Config)?;

    let tree_text =
        std::fs::read_to_string(&config.treefile).map_err(|e| RunLoadError::Data(DataError::Io(config.treefile.clone(), e)))?;
    let mut raw_nodes = newick::parse(&config.treefile, &tree_text).map_err(RunLoadError::Data)?;

    if !config.use_global_sampling_probability {
        if let Some(path) = &config.sample_probs_filename {
            let text = std::fs::read_to_string(path).map_err(|e| RunLoadError::Data(DataError::Io(path.clone(), e)))?;
            sample_probs::apply(path, &text, &mut raw_nodes).map_err(RunLoadError::Data)?;
        }
    } else {
        for node in &mut raw_nodes {
            node.sampling_fraction = config.global_sampling_fraction;
        }
    }

    let tree = Tree::build(raw_nodes).map_err(|e| RunLoadError::Data(DataError::Tree(e)))?;

    let tip_trait_values = match (&config.model_type, &config.traitfile) {
        (ModelType::Trait, Some(path)) => {
            let text = std::fs::read_to_string(path).map_err(|e| RunLoadError::Data(DataError::Io(path.clone(), e)))?;
            traits_file::parse(path, &text, &tree).map_err(RunLoadError::Data)?
        }
        _ => Vec::new(),
    };

    let initial_events = if config.load_event_data {
        let path = config
            .event_data_infile
            .as_ref()
            .ok_or(RunLoadError::Config(ConfigError::MissingKey("eventDataInfile")))?;
        let text = std::fs::read_to_string(path).map_err(|e| RunLoadError::Data(DataError::Io(path.clone(), e)))?;
        event_data::parse(path, &text, &tree, config.model_type == ModelType::Diversification).map_err(RunLoadError::Data)?
    } else {
        Vec::new()
    };

    Ok(LoadedRun { config, tree, initial_events, tip_trait_values })
}

#[derive(Debug, thiserror::Error)]
pub enum RunLoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Data(#[from] DataError),
}
