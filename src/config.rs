// Server and admin-tool settings: `config.toml` under the platform config
// directory, overridden by environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "movie-catalog";
const CONFIG_FILENAME: &str = "config.toml";

pub const DEFAULT_COLLECTION: &str = "items";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Contents of `config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,

    pub paths: PathsConfig,

    /// Document store configuration
    pub store: StoreConfig,

    /// External lookup providers (TMDB, LLM)
    pub enrichment: EnrichmentConfig,

    /// Settings used by the catalog-admin tool
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listening port, 8080 unless set
    pub port: u16,

    /// Interface to listen on, all interfaces unless set
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Where the SQLite databases live
    pub data_dir: Option<PathBuf>,

    /// Where `config.toml` is looked up
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Collection holding the movie records (default: items)
    pub collection: String,

    /// Explicit database URL, otherwise derived from the data directory
    pub database_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// TMDB v4 read access token
    pub tmdb_bearer: Option<String>,

    /// TMDB v3 API key, used when no bearer token is set
    pub tmdb_api_key: Option<String>,

    /// API key for the OpenAI-compatible chat completions endpoint
    pub openai_api_key: Option<String>,

    /// Model used by the AI lookup
    pub openai_model: String,

    /// Base URL of the chat completions API
    pub openai_base_url: String,

    /// Timeout for a single outbound lookup request, in seconds (default: 60)
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            tmdb_bearer: None,
            tmdb_api_key: None,
            openai_api_key: None,
            openai_model: DEFAULT_OPENAI_MODEL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Project id used to pick the database and credentials
    pub project: Option<String>,

    /// Base URL of a running catalog server (used by poster backfill)
    pub api_base_url: Option<String>,
}

/// Resolved config and data directories. XDG locations on Unix, the
/// platform equivalents elsewhere, the working directory as a last resort.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// `$XDG_CONFIG_HOME/movie-catalog` by default
    pub config_dir: PathBuf,

    /// `$XDG_DATA_HOME/movie-catalog` by default
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// `MOVIE_CATALOG_CONFIG_DIR` / `MOVIE_CATALOG_DATA_DIR` win over the
    /// `[paths]` section, which wins over the platform directories.
    pub fn new(config_overrides: &PathsConfig) -> Self {
        let config_dir = Self::resolve_dir(
            "MOVIE_CATALOG_CONFIG_DIR",
            &config_overrides.config_dir,
            dirs::config_dir(),
        );
        let data_dir = Self::resolve_dir(
            "MOVIE_CATALOG_DATA_DIR",
            &config_overrides.data_dir,
            dirs::data_dir(),
        );

        Self {
            config_dir,
            data_dir,
        }
    }

    /// Everything in the working directory (portable mode)
    pub fn current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd,
        }
    }

    fn resolve_dir(
        env_var: &str,
        config_override: &Option<PathBuf>,
        platform_dir: Option<PathBuf>,
    ) -> PathBuf {
        if let Ok(path) = std::env::var(env_var) {
            return PathBuf::from(path);
        }

        if let Some(ref path) = config_override {
            return path.clone();
        }

        if let Some(dir) = platform_dir {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Database file for a project; the default project uses `catalog.db`
    pub fn database_path(&self, project: Option<&str>) -> PathBuf {
        match project {
            Some(project) => self.data_dir.join(format!("{}.db", project)),
            None => self.data_dir.join("catalog.db"),
        }
    }

    /// `sqlite:` URL for [`Self::database_path`], created on first open
    pub fn database_url(&self, project: Option<&str>) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path(project).display())
    }

    pub fn config_file_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILENAME)
    }

    /// Create both directories if missing
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    pub fn log_paths(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!("Data directory: {}", self.data_dir.display());
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new(&PathsConfig::default())
    }
}

/// Effective settings after merging `config.toml` with the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub paths: AppPaths,

    pub port: u16,

    pub bind_address: String,

    /// Collection holding the movie records
    pub collection: String,

    /// Explicit database URL (env DATABASE_URL or [store] database_url)
    pub database_url: Option<String>,

    /// Lookup provider settings
    pub enrichment: EnrichmentConfig,

    /// Admin tool settings
    pub admin: AdminConfig,
}

impl AppConfig {
    /// Environment variables beat `config.toml`, which beats the defaults.
    /// `MOVIE_CATALOG_PORTABLE=1` skips the file and keeps everything in the
    /// working directory.
    pub fn load() -> Self {
        let portable_mode = env_flag("MOVIE_CATALOG_PORTABLE");

        if portable_mode {
            tracing::info!("Running in portable mode (using current directory)");
            let mut config = Self::build(ConfigFile::default());
            config.paths = AppPaths::current_dir();
            return config;
        }

        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        Self::build(config_file)
    }

    /// Directory searched for `config.toml`
    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("MOVIE_CATALOG_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Read `config.toml` from `config_dir`. A missing or broken file yields
    /// the defaults.
    pub fn load_config_file(config_dir: &Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Apply environment overrides on top of a parsed file
    pub fn build(config_file: ConfigFile) -> Self {
        let paths = AppPaths::new(&config_file.paths);

        let port = std::env::var("MOVIE_CATALOG_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(config_file.server.port);

        let bind_address = std::env::var("MOVIE_CATALOG_BIND_ADDRESS")
            .unwrap_or_else(|_| config_file.server.bind_address.clone());

        // FIRESTORE_COLLECTION is kept so existing deployments keep their collection name
        let collection = std::env::var("MOVIE_CATALOG_COLLECTION")
            .or_else(|_| std::env::var("FIRESTORE_COLLECTION"))
            .ok()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(config_file.store.collection);

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .or(config_file.store.database_url);

        let file_enrichment = config_file.enrichment;
        let enrichment = EnrichmentConfig {
            tmdb_bearer: std::env::var("TMDB_BEARER")
                .ok()
                .or(file_enrichment.tmdb_bearer),
            tmdb_api_key: std::env::var("TMDB_API_KEY")
                .ok()
                .or(file_enrichment.tmdb_api_key),
            openai_api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .or(file_enrichment.openai_api_key),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or(file_enrichment.openai_model),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or(file_enrichment.openai_base_url),
            timeout_secs: std::env::var("ENRICHMENT_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(file_enrichment.timeout_secs),
        };

        let admin = AdminConfig {
            project: config_file.admin.project,
            api_base_url: std::env::var("MOVIE_CATALOG_API_URL")
                .ok()
                .or(config_file.admin.api_base_url),
        };

        Self {
            paths,
            port,
            bind_address,
            collection,
            database_url,
            enrichment,
            admin,
        }
    }

    /// Get the database URL, explicit setting first, then the data directory
    pub fn database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(|| self.paths.database_url(None))
    }

    /// Base URL a local client should use to reach this server
    pub fn local_api_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Startup summary of paths, collection and enabled lookups
    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Bind address: {}:{}", self.bind_address, self.port);
        tracing::info!("Collection: {}", self.collection);

        if self.enrichment.tmdb_bearer.is_some() || self.enrichment.tmdb_api_key.is_some() {
            tracing::info!("TMDB lookup: ENABLED");
        } else {
            tracing::info!("TMDB lookup: disabled");
            tracing::info!("Hint: set TMDB_BEARER or add tmdb_bearer to config.toml");
        }

        if self.enrichment.openai_api_key.is_some() {
            tracing::info!(
                "AI lookup: ENABLED (model {})",
                self.enrichment.openai_model
            );
        } else {
            tracing::debug!("AI lookup: disabled (no OPENAI_API_KEY)");
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portable_paths_share_directory() {
        let paths = AppPaths::current_dir();
        assert!(paths.config_dir.is_absolute() || paths.config_dir == PathBuf::from("."));
        assert_eq!(paths.config_dir, paths.data_dir);
    }

    #[test]
    fn test_project_database_urls() {
        let paths = AppPaths::current_dir();
        let url = paths.database_url(None);
        assert!(url.starts_with("sqlite:"));
        assert!(url.ends_with("catalog.db?mode=rwc"));
        assert!(paths
            .database_url(Some("movies-prod"))
            .ends_with("movies-prod.db?mode=rwc"));
    }

    #[test]
    fn test_config_file_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.store.collection, "items");
        assert_eq!(config.enrichment.timeout_secs, 60);
        assert!(config.enrichment.tmdb_bearer.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[server]
port = 9000
bind_address = "127.0.0.1"

[store]
collection = "movies"

[enrichment]
tmdb_bearer = "token"
openai_model = "gpt-4o"
timeout_secs = 120

[admin]
project = "movie-night"

[paths]
data_dir = "/custom/data"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.store.collection, "movies");
        assert_eq!(config.enrichment.tmdb_bearer.as_deref(), Some("token"));
        assert_eq!(config.enrichment.openai_model, "gpt-4o");
        assert_eq!(config.enrichment.timeout_secs, 120);
        assert_eq!(config.admin.project.as_deref(), Some("movie-night"));
        assert_eq!(config.paths.data_dir, Some(PathBuf::from("/custom/data")));
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let toml_str = r#"
[enrichment]
tmdb_api_key = "abc"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080); // default
        assert_eq!(config.enrichment.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(config.enrichment.tmdb_api_key.as_deref(), Some("abc"));
    }
}
