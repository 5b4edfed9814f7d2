//! Brand to user list mapping.
//!
//! Brands come from an optional YAML file and from `<BRAND>_USER_LIST` environment variables,
//! the latter taking precedence. Brand names are matched case-insensitively.
use std::collections::BTreeMap;
use std::fs;

use serde::Deserialize;
use tracing::warn;

use crate::config::{non_blank, Config};
use crate::error::ConfigError;

const ENV_SUFFIX: &str = "_USER_LIST";
pub const DEFAULT_BRAND: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrandConfig {
    pub user_list_id: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrandsFile {
    #[serde(default)]
    brands: BTreeMap<String, BrandConfig>,
}

/// Where an upload goes and which rows it takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Rows labelled with a different brand are dropped. `None` keeps every row.
    pub brand_filter: Option<String>,
    pub user_list_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct BrandRegistry {
    brands: BTreeMap<String, BrandConfig>,
    default_user_list_id: Option<String>,
}

impl BrandRegistry {
    pub fn new(default_user_list_id: Option<String>) -> Self {
        Self {
            brands: BTreeMap::new(),
            default_user_list_id,
        }
    }

    /// Brands file first, then the process environment on top.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let registry = Self::new(non_blank(&config.default_user_list_id).map(str::to_owned));
        let registry = match non_blank(&config.brands_file) {
            Some(path) => registry.with_file(path)?,
            None => registry,
        };

        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
        Ok(registry.with_env_vars(vars))
    }

    pub fn with_yaml(mut self, yaml: &str) -> Result<Self, ConfigError> {
        let file: BrandsFile = serde_yaml::from_str(yaml)?;
        for (brand, config) in file.brands {
            self.brands.insert(brand.trim().to_lowercase(), config);
        }
        Ok(self)
    }

    pub fn with_file(self, path: &str) -> Result<Self, ConfigError> {
        let yaml = fs::read_to_string(path).map_err(|source| ConfigError::BrandsFile {
            path: path.to_owned(),
            source,
        })?;
        self.with_yaml(&yaml)
    }

    /// Register every `<BRAND>_USER_LIST=<id>` pair found in `vars`.
    pub fn with_env_vars<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(brand) = key.strip_suffix(ENV_SUFFIX) else {
                continue;
            };
            let user_list_id = value.trim();
            if brand.is_empty() || user_list_id.is_empty() {
                continue;
            }

            let brand = brand.to_lowercase();
            let description = self
                .brands
                .remove(&brand)
                .and_then(|existing| existing.description);
            self.brands.insert(
                brand,
                BrandConfig {
                    user_list_id: user_list_id.to_owned(),
                    description,
                },
            );
        }
        self
    }

    pub fn brands(&self) -> impl Iterator<Item = (&str, &BrandConfig)> {
        self.brands
            .iter()
            .map(|(brand, config)| (brand.as_str(), config))
    }

    pub fn default_user_list_id(&self) -> Option<&str> {
        self.default_user_list_id.as_deref()
    }

    /// Unknown brands fall back to the default list without filtering rows.
    pub fn resolve(&self, brand: Option<&str>) -> Result<UploadTarget, ConfigError> {
        let brand = brand
            .map(str::trim)
            .filter(|brand| !brand.is_empty())
            .map(str::to_lowercase);

        match brand {
            Some(brand) if brand != DEFAULT_BRAND => match self.brands.get(&brand) {
                Some(config) => Ok(UploadTarget {
                    brand_filter: Some(brand),
                    user_list_id: config.user_list_id.clone(),
                }),
                None => {
                    warn!(%brand, "brand is not configured, using the default user list");
                    self.default_target(&brand)
                }
            },
            _ => self.default_target(DEFAULT_BRAND),
        }
    }

    fn default_target(&self, brand: &str) -> Result<UploadTarget, ConfigError> {
        let user_list_id = self
            .default_user_list_id
            .clone()
            .ok_or_else(|| ConfigError::NoUserList(brand.to_owned()))?;

        Ok(UploadTarget {
            brand_filter: None,
            user_list_id,
        })
    }
}
