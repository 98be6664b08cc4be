use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const DEFAULT_MAX_PENDING_REPLIES: u32 = 20;

/// One monitored product/account configuration, as declared in `tenants.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,
    /// Product description fed into scoring and reply prompts.
    pub product: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Community (subreddit) names without the `r/` prefix.
    #[serde(default)]
    pub communities: Vec<String>,
    /// `0` keeps every scored item; otherwise items must score at least this.
    #[serde(default)]
    pub score_threshold: u8,
    #[serde(default = "default_max_pending_replies")]
    pub max_pending_replies: u32,
    #[serde(default)]
    pub auto_approve: bool,
    pub notify_email: Option<String>,
}

fn default_max_pending_replies() -> u32 {
    DEFAULT_MAX_PENDING_REPLIES
}

impl TenantConfig {
    /// Generate a URL-safe slug from the tenant name.
    #[must_use]
    pub fn slug(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else if c == ' ' {
                    '-'
                } else {
                    '\0'
                }
            })
            .filter(|&c| c != '\0')
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Communities with any `r/` prefix and surrounding whitespace removed.
    #[must_use]
    pub fn normalized_communities(&self) -> Vec<String> {
        self.communities
            .iter()
            .map(|c| c.trim().trim_start_matches("/r/").trim_start_matches("r/"))
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct TenantsFile {
    pub tenants: Vec<TenantConfig>,
}

/// Load and validate the tenants configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_tenants(path: &Path) -> Result<TenantsFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TenantsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let tenants_file: TenantsFile =
        serde_yaml::from_str(&content).map_err(ConfigError::TenantsFileParse)?;

    validate_tenants(&tenants_file)?;

    Ok(tenants_file)
}

fn validate_tenants(tenants_file: &TenantsFile) -> Result<(), ConfigError> {
    let mut seen_slugs = HashSet::new();

    for tenant in &tenants_file.tenants {
        if tenant.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "tenant name must be non-empty".to_string(),
            ));
        }

        if tenant.product.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' needs a product description",
                tenant.name
            )));
        }

        if tenant.keywords.is_empty() && tenant.normalized_communities().is_empty() {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' has no keywords or communities to search",
                tenant.name
            )));
        }

        if tenant.score_threshold > 100 {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' has score_threshold {}; must be within 0..=100",
                tenant.name, tenant.score_threshold
            )));
        }

        if tenant.max_pending_replies == 0 {
            return Err(ConfigError::Validation(format!(
                "tenant '{}' must allow at least one pending reply",
                tenant.name
            )));
        }

        let slug = tenant.slug();
        if !seen_slugs.insert(slug.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate tenant slug: '{}' (from tenant '{}')",
                slug, tenant.name
            )));
        }
    }

    Ok(())
}
