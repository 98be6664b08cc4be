//! Shared configuration and domain vocabulary for the engagement pipeline.

pub mod app_config;
pub mod config;
pub mod failure;
pub mod interactions;
pub mod tenants;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, LimiterSettings};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use failure::FailureClass;
pub use interactions::{InteractionStatus, ItemKind, UnknownVariant};
pub use tenants::{load_tenants, TenantConfig, TenantsFile};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read tenants file {path}: {source}")]
    TenantsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse tenants file: {0}")]
    TenantsFileParse(#[from] serde_yaml::Error),

    #[error("tenant config validation failed: {0}")]
    Validation(String),
}
