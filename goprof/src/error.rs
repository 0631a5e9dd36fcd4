//! Crate-wide error types.
//!
//! Only contractually required input being absent is an error. Data-shape
//! anomalies inside a profile are reported as warnings on each report.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("category '{0}' has an empty pattern")]
    EmptyPattern(String),

    #[error("category '{name}' has an invalid pattern: {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("profile parse error: {0}")]
    Parse(#[from] goprof_parse::ParseError),

    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
