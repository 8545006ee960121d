// Shared setup for the administrative commands: which project they act on
// and which database that project's credentials point at.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{AdminConfig, AppConfig};
use crate::db;
use crate::store::SqliteCatalogStore;

pub mod backfill;
pub mod delete;
pub mod import;

const SECRETS_DIR: &str = "secrets";
const ENV_LOCAL_FILE: &str = ".env.local";

/// Where the database credentials came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// `MOVIE_CATALOG_CREDENTIALS` named this file
    EnvVar(PathBuf),
    /// Discovered under `secrets/`
    SecretsFile(PathBuf),
    /// No credentials file; the project's own database
    Default,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::EnvVar(path) => {
                write!(f, "MOVIE_CATALOG_CREDENTIALS={}", path.display())
            }
            CredentialSource::SecretsFile(path) => write!(f, "{}", path.display()),
            CredentialSource::Default => write!(f, "default project database"),
        }
    }
}

/// Contents of a credentials JSON file.
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    database_url: String,
}

/// Resolved target of an admin command.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub project: String,
    pub credentials: CredentialSource,
    pub database_url: String,
}

/// Project id: `MOVIE_CATALOG_PROJECT`, `GOOGLE_CLOUD_PROJECT`, the
/// `[admin] project` setting, then `.env.local` under `root`. Placeholder
/// values containing `<` are ignored.
pub fn resolve_project_id(
    env: &impl Fn(&str) -> Option<String>,
    admin: &AdminConfig,
    root: &Path,
) -> Option<String> {
    let usable = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.contains('<'))
    };

    usable(env("MOVIE_CATALOG_PROJECT"))
        .or_else(|| usable(env("GOOGLE_CLOUD_PROJECT")))
        .or_else(|| usable(admin.project.clone()))
        .or_else(|| usable(read_env_local_project(&root.join(ENV_LOCAL_FILE))))
}

fn read_env_local_project(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let pattern = Regex::new(r"(?m)^MOVIE_CATALOG_PROJECT=(.+?)\s*$").ok()?;
    pattern
        .captures(&contents)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn read_credentials(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credentials {}", path.display()))?;
    let parsed: CredentialsFile = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid credentials JSON {}", path.display()))?;
    Ok(parsed.database_url)
}

/// A `*.json` under `secrets/`, preferring one whose name mentions the project.
fn find_secrets_file(root: &Path, project: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root.join(SECRETS_DIR)).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    candidates.sort();

    let named = candidates.iter().position(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.contains(project))
    });

    match named {
        Some(index) => Some(candidates.swap_remove(index)),
        None => candidates.into_iter().next(),
    }
}

impl AdminContext {
    /// Resolve against the process environment and the current directory.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        let root = std::env::current_dir().context("Failed to read current directory")?;
        Self::resolve_with(config, &root, &|key| std::env::var(key).ok())
    }

    pub fn resolve_with(
        config: &AppConfig,
        root: &Path,
        env: &impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let Some(project) = resolve_project_id(env, &config.admin, root) else {
            bail!(
                "Project id is required. Set MOVIE_CATALOG_PROJECT or GOOGLE_CLOUD_PROJECT, \
                 or configure [admin] project in config.toml or {}",
                ENV_LOCAL_FILE
            );
        };

        if let Some(path) = env("MOVIE_CATALOG_CREDENTIALS").filter(|p| !p.trim().is_empty()) {
            let path = PathBuf::from(path);
            let database_url = read_credentials(&path)?;
            return Ok(Self {
                project,
                credentials: CredentialSource::EnvVar(path),
                database_url,
            });
        }

        if let Some(path) = find_secrets_file(root, &project) {
            match read_credentials(&path) {
                Ok(database_url) => {
                    return Ok(Self {
                        project,
                        credentials: CredentialSource::SecretsFile(path),
                        database_url,
                    })
                }
                Err(e) => tracing::warn!("Ignoring secrets file: {:#}", e),
            }
        }

        let database_url = config
            .database_url
            .clone()
            .unwrap_or_else(|| config.paths.database_url(Some(&project)));

        Ok(Self {
            project,
            credentials: CredentialSource::Default,
            database_url,
        })
    }

    /// Print which project and credentials a command runs against.
    pub fn announce(&self, collection: &str) {
        println!("Using project: {}", self.project);
        println!("Credentials: {}", self.credentials);
        println!("Collection: {}", collection);
    }

    pub async fn open_store(&self, collection: &str) -> Result<SqliteCatalogStore> {
        let pool = db::connect(&self.database_url).await?;
        Ok(SqliteCatalogStore::new(pool, collection))
    }
}
