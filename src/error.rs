use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AhleError {
    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error("Missing column '{column}' in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("External attribution: {0}")]
    External(String),

    #[error("No usable input: {0}")]
    NoUsableInput(String),
}

#[cfg(feature = "python")]
impl From<AhleError> for pyo3::PyErr {
    fn from(err: AhleError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}
