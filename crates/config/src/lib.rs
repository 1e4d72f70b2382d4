//! Manages application configuration by loading settings from standard locations.
//!
//! This crate provides a unified configuration object (`Config`) that aggregates
//! settings from files and environment variables, making them accessible
//! globally via a lazily initialized static reference (`CONFIG`).

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use etcetera::BaseStrategy;
use figment::providers::{Env, Format, Toml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};

/// The default configuration values
const DEFAULT_TOML_CONFIG: &str = include_str!("./kpm.default.toml");
const APP: &str = "kpm";

//================================================================================================
// Statics
//================================================================================================

/// Provides a lazily instantiated static reference to the application `Config`.
///
/// This static variable ensures that configuration is parsed only once from
/// canonical locations and then made immutably available throughout the
/// application's lifecycle.
pub static CONFIG: LazyLock<Config> = LazyLock::new(load_config);

//================================================================================================
// Types
//================================================================================================

/// Defines cache-related configuration settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CacheConfig {
    /// The root directory for storing cached data.
    pub root: PathBuf,
}

/// Settings for the default OCI registry used by version-only dependencies.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RegistryConfig {
    /// Registry host, e.g. `ghcr.io`.
    pub host: String,
    /// Namespace under the host where packages live.
    pub repo: String,
    /// Talk plain http instead of https (local test registries).
    #[serde(default)]
    pub plain_http: bool,
    /// Optional username for registry authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password or token for registry authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Network fetch behaviour.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FetchConfig {
    /// Deadline for a single dependency fetch, in seconds.
    pub timeout: u64,
    /// How many times a transient failure is retried before giving up.
    pub retries: u32,
}

/// The external compiler collaborator.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CompilerConfig {
    /// Program name or path of the compiler executable.
    pub program: String,
}

/// Represents the application's primary configuration structure.
#[derive(Deserialize, Serialize, Default, Debug, Clone)]
pub struct Config {
    /// Cache-related settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Default registry settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Fetch deadlines and retries.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Compiler invocation settings.
    #[serde(default)]
    pub compiler: CompilerConfig,
}

//================================================================================================
// Impls
//================================================================================================

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: get_cache_dir(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "ghcr.io".into(),
            repo: "kcl-lang".into(),
            plain_http: false,
            username: None,
            password: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: 300,
            retries: 3,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            program: "kcl".into(),
        }
    }
}

impl FetchConfig {
    /// The per-fetch deadline as a [`Duration`].
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Config {
    /// Constructs a `Figment` instance for configuration loading.
    ///
    /// This method builds a configuration provider by layering default settings,
    /// user-specific configuration files, and environment variables.
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Config::default()).merge(Toml::string(DEFAULT_TOML_CONFIG));

        if let Ok(c) = etcetera::choose_base_strategy() {
            let config = c.config_dir().join(format!("{APP}.toml"));
            fig = fig.admerge(Toml::file(config));
        }

        #[cfg(feature = "git")]
        if let Ok(r) = gix::ThreadSafeRepository::discover(".") {
            let repo_config = r.git_dir().join(format!("info/{APP}.toml"));
            fig = fig.admerge(Toml::file(repo_config));
        };

        fig.admerge(Env::prefixed("KPM_").split("__"))
    }

    /// Creates a `Config` instance from a given provider.
    pub fn from<T: Provider>(provider: T) -> Result<Config, Box<figment::Error>> {
        Figment::from(provider).extract().map_err(Box::new)
    }
}

impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        Metadata::named("kpm config")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Determines the appropriate cache directory based on the operating system.
fn get_cache_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.cache_dir().join(APP)
    } else {
        std::env::temp_dir().join(APP)
    }
}

/// Loads the application configuration using the default `Figment` provider.
///
/// This function is used to initialize the `CONFIG` static variable.
fn load_config() -> Config {
    Config::figment().extract().unwrap_or_else(|e| {
        tracing::error!(error = %e, "problem loading config from default sources, falling back to defaults");
        Config::default()
    })
}
