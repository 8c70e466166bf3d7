use dopfetch::DopError;
use thiserror::Error;

/// Errors of the command line front end.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Download(#[from] DopError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
