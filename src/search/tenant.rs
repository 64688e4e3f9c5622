//! Tenant resolution

use crate::error::{SearchError, SearchResult};
use crate::search::config::SearchConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static APP_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("valid app id pattern"));

static PREFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{0,32}$").expect("valid prefix pattern"));

/// Backend-level name of one tenant's index
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps app ids to namespaces.
///
/// The mapping is `<prefix><app_id>`. App ids outside
/// `^[a-z0-9][a-z0-9_-]{0,63}$` are rejected rather than rewritten, so two
/// distinct app ids can never share a namespace.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    prefix: String,
    default_app_id: Option<String>,
}

impl TenantResolver {
    pub fn new(prefix: impl Into<String>, default_app_id: Option<String>) -> SearchResult<Self> {
        let prefix = prefix.into();
        if !PREFIX_PATTERN.is_match(&prefix) {
            return Err(SearchError::Configuration(format!(
                "Invalid namespace prefix '{}'",
                prefix
            )));
        }

        if let Some(app_id) = &default_app_id {
            validate_app_id(app_id)?;
        }

        Ok(Self {
            prefix,
            default_app_id,
        })
    }

    pub fn from_config(config: &SearchConfig) -> SearchResult<Self> {
        Self::new(config.namespace_prefix.clone(), config.default_app_id.clone())
    }

    /// Namespace for `app_id`, or for the default tenant when `None`
    pub fn resolve(&self, app_id: Option<&str>) -> SearchResult<Namespace> {
        let app_id = match app_id {
            Some(app_id) => {
                validate_app_id(app_id)?;
                app_id
            }
            None => self.default_app_id.as_deref().ok_or_else(|| {
                SearchError::Configuration(
                    "No app id given and no default app id configured".to_string(),
                )
            })?,
        };

        Ok(Namespace(format!("{}{}", self.prefix, app_id)))
    }

    pub fn default_app_id(&self) -> Option<&str> {
        self.default_app_id.as_deref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn validate_app_id(app_id: &str) -> SearchResult<()> {
    if APP_ID_PATTERN.is_match(app_id) {
        Ok(())
    } else {
        Err(SearchError::Configuration(format!(
            "Invalid app id '{}': expected lowercase letters, digits, '_' or '-'",
            app_id
        )))
    }
}
