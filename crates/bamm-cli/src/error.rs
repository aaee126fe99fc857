use thiserror::Error;

/// The CLI's own error seam: every failure mode `main` can hit, folded
/// into one type via `#[from]` so `?` works end to end. `anyhow` is never
/// used here — only at the very outer edge, in `main`, to format this for
/// the terminal and pick an exit code.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] bamm_io::ConfigError),

    #[error(transparent)]
    Data(#[from] bamm_io::DataError),

    #[error(transparent)]
    RunLoad(#[from] bamm_io::RunLoadError),

    #[error(transparent)]
    Model(#[from] bamm_core::ModelError),

    #[error("could not write output file: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Configuration and input-data failures are startup errors (2);
    /// everything else is an internal failure (1).
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Data(_) | CliError::RunLoad(_) => 2,
            CliError::Model(_) | CliError::Io(_) => 1,
        }
    }
}
