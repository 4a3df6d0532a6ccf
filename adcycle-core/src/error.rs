use thiserror::Error;

use crate::config::ConfigError;
use crate::tracking::StoreError;

/// Errors surfaced synchronously by public operations.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("AdSense not initialized, call c3.init() first")]
    NotInitialized,
    #[error("C3 SDK already initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Store(#[from] StoreError),
}
