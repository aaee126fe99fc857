use thiserror::Error;

/// Startup-fatal failures reading or validating the control file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}:{1}: malformed line (expected `key = value`): {2:?}")]
    MalformedLine(String, usize, String),

    #[error("{0}:{1}: unrecognised key '{2}'")]
    UnknownKey(String, usize, String),

    #[error("duplicate key '{0}' (first set at line {1}, repeated at line {2})")]
    DuplicateKey(String, usize, usize),

    #[error("missing required key '{0}'")]
    MissingKey(&'static str),

    #[error("key '{0}': expected a numeric value, got {1:?}")]
    NotNumeric(String, String),

    #[error("key '{0}': expected a boolean value, got {1:?}")]
    NotBoolean(String, String),

    #[error("key '{0}': unrecognised model type {1:?} (expected \"speciationextinction\" or \"trait\")")]
    UnknownModelType(String, String),

    #[error("key '{0}': invalid value {1:?}")]
    InvalidValue(String, String),

    #[error("could not read control file {0:?}: {1}")]
    Io(String, #[source] std::io::Error),
}

/// Startup-fatal failures reading or cross-checking tree, trait, or
/// event-data input.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("could not read {0:?}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("{0}:{1}: {2}")]
    Parse(String, usize, String),

    #[error(transparent)]
    Tree(#[from] bamm_core::TreeError),

    #[error("traits file references tip {0:?}, which is not present in the tree")]
    UnknownTraitTip(String),

    #[error("event-data row references tip {0:?}, which is not present in the tree")]
    UnknownEventTip(String),

    #[error("event-data row names two tips with no common ancestor: {0:?}, {1:?}")]
    NoCommonAncestor(String, String),
}
