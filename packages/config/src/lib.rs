#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Configuration for the hotspot acquisition pipeline.
//!
//! Values are resolved in three layers:
//!
//! 1. Built-in defaults (the public `TerraBrasilis` queimadas service and a
//!    local `PostGIS`).
//! 2. An optional TOML file, passed explicitly or named by
//!    `HOTSPOT_SYNC_CONFIG`.
//! 3. Environment variables, which win over the file. Credentials can also
//!    be supplied through `*_FILE` variables pointing at secret files (the
//!    Docker swarm convention).
//!
//! The resolved [`Config`] is passed by value into every component; nothing
//! reads the environment after startup.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

/// Environment variable naming the TOML config file.
pub const CONFIG_PATH_ENV: &str = "HOTSPOT_SYNC_CONFIG";

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
});

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file or a secret file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("Invalid configuration value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Feature service (`GeoServer` WFS) settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Server root, e.g. `https://terrabrasilis.dpi.inpe.br`.
    pub base_url: String,
    /// Path to the `GeoServer` instance below the root.
    pub base_path: String,
    /// `GeoServer` workspace holding the layer.
    pub workspace: String,
    /// Layer (feature type) name.
    pub layer: String,
    /// Attribute used for the date-range filter.
    pub date_attribute: String,
    /// Attribute used to order paged results.
    pub sort_attribute: String,
    /// Output projection requested from the service.
    pub srs_name: String,
    /// `GetFeature` output format. Pages are written as `.zip` archives.
    pub output_format: String,
    /// Per-request record ceiling used when the capabilities document does
    /// not advertise `CountDefault`.
    pub default_page_limit: u64,
    /// Extra CQL predicate `AND`ed onto the date filter.
    pub extra_filter: Option<String>,
    /// Basic-auth user.
    pub user: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://terrabrasilis.dpi.inpe.br".to_string(),
            base_path: "queimadas/geoserver".to_string(),
            workspace: "terrabrasilis".to_string(),
            layer: "focos_br_ref_2016".to_string(),
            date_attribute: "datahora".to_string(),
            sort_attribute: "fid".to_string(),
            srs_name: "EPSG:4674".to_string(),
            output_format: "SHAPE-ZIP".to_string(),
            default_page_limit: 10_000,
            extra_filter: None,
            user: None,
            password: None,
        }
    }
}

impl ServiceConfig {
    /// The WFS endpoint: `{base_url}/{base_path}/{workspace}/wfs`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.base_path.trim_matches('/');
        let workspace = self.workspace.trim_matches('/');
        if path.is_empty() {
            format!("{base}/{workspace}/wfs")
        } else {
            format!("{base}/{path}/{workspace}/wfs")
        }
    }

    /// Basic-auth credentials, when both parts are set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.user.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection URL. Takes precedence over the individual fields.
    pub url: Option<String>,
    /// Host name.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, either the configured one or one assembled from the
    /// individual fields.
    #[must_use]
    pub fn connection_url(&self) -> String {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return url.to_string();
        }
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.dbname
        )
    }
}

/// Acquisition run settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Directory that receives downloaded page archives.
    pub output_dir: PathBuf,
    /// How many of the most recent open ledger rows a reconciliation sweep
    /// examines.
    pub lookback: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            lookback: 5,
        }
    }
}

/// Table names used by the importer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Canonical hotspot table.
    pub hotspot_table: String,
    /// Staging table, replaced on every batch.
    pub staging_table: String,
    /// Biome reference polygons (`bioma`, `geom` columns).
    pub biome_table: String,
    /// Value written to the ledger's `origin_data`. Defaults to the layer
    /// name.
    pub origin_tag: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hotspot_table: "focos_aqua_referencia".to_string(),
            staging_table: "focuses".to_string(),
            biome_table: "lm_bioma_250".to_string(),
            origin_tag: None,
        }
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Feature service settings.
    pub service: ServiceConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Run settings.
    pub acquisition: AcquisitionConfig,
    /// Table names.
    pub store: StoreConfig,
}

impl Config {
    /// Loads configuration from `path` (or `HOTSPOT_SYNC_CONFIG`), then
    /// applies process environment overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a file cannot be read or parsed, or a
    /// value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                Self::from_toml(&text)?
            }
            None => {
                log::info!("No config file given, using defaults and environment");
                Self::default()
            }
        };

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document. Missing sections and keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] if the document does not match.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies environment overrides using `env` as the lookup.
    ///
    /// Plain variables replace file values. `*_FILE` variables are then
    /// read as secret files and replace the credential they name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a secret file cannot be read or a numeric
    /// variable does not parse.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let set = |target: &mut String, key: &str| {
            if let Some(value) = env(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };

        set(&mut self.service.base_url, "GEOSERVER_BASE_URL");
        set(&mut self.service.base_path, "GEOSERVER_BASE_PATH");
        set(&mut self.service.workspace, "WORKSPACE_NAME");
        set(&mut self.service.layer, "LAYER_NAME");
        set(&mut self.service.date_attribute, "DATE_ATTRIBUTE");
        set(&mut self.service.sort_attribute, "SORT_ATTRIBUTE");
        if let Some(user) = env("GEOSERVER_USER").filter(|v| !v.is_empty()) {
            self.service.user = Some(user);
        }
        if let Some(pass) = env("GEOSERVER_PASS").filter(|v| !v.is_empty()) {
            self.service.password = Some(pass);
        }

        set(&mut self.database.host, "POSTGRES_HOST");
        set(&mut self.database.dbname, "POSTGRES_DBNAME");
        set(&mut self.database.user, "POSTGRES_USER");
        set(&mut self.database.password, "POSTGRES_PASS");
        if let Some(port) = env("POSTGRES_PORT").filter(|v| !v.is_empty()) {
            self.database.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "database.port",
                message: format!("POSTGRES_PORT is not a port number: {port}"),
            })?;
        }
        if let Some(url) = env("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = Some(url);
        }

        if let Some(dir) = env("DATA_DIR").filter(|v| !v.is_empty()) {
            self.acquisition.output_dir = PathBuf::from(dir);
        }

        if let Some(path) = env("GEOSERVER_USER_FILE") {
            self.service.user = Some(read_secret(&path)?);
        }
        if let Some(path) = env("GEOSERVER_PASS_FILE") {
            self.service.password = Some(read_secret(&path)?);
        }
        if let Some(path) = env("POSTGRES_USER_FILE") {
            self.database.user = read_secret(&path)?;
        }
        if let Some(path) = env("POSTGRES_PASS_FILE") {
            self.database.password = read_secret(&path)?;
        }

        Ok(())
    }

    /// Checks values the pipeline cannot work without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("service.base_url", &self.service.base_url),
            ("service.workspace", &self.service.workspace),
            ("service.layer", &self.service.layer),
            ("service.date_attribute", &self.service.date_attribute),
            ("service.sort_attribute", &self.service.sort_attribute),
            ("service.srs_name", &self.service.srs_name),
            ("service.output_format", &self.service.output_format),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.service.default_page_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "service.default_page_limit",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.acquisition.lookback == 0 {
            return Err(ConfigError::Invalid {
                field: "acquisition.lookback",
                message: "must be greater than zero".to_string(),
            });
        }

        let identifiers = [
            ("store.hotspot_table", &self.store.hotspot_table),
            ("store.staging_table", &self.store.staging_table),
            ("store.biome_table", &self.store.biome_table),
        ];
        for (field, value) in identifiers {
            if !is_sql_identifier(value) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("not a plain SQL identifier: {value:?}"),
                });
            }
        }

        Ok(())
    }

    /// The tag recorded in the ledger's `origin_data` column.
    #[must_use]
    pub fn origin_tag(&self) -> &str {
        self.store
            .origin_tag
            .as_deref()
            .unwrap_or(&self.service.layer)
    }
}

/// Whether `value` is a bare or schema-qualified SQL identifier that is
/// safe to splice into a statement.
#[must_use]
pub fn is_sql_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

fn read_secret(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
        .map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })
}
