use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}
