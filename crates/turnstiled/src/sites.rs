//! Operator-maintained site registry, persisted as TOML.
//!
//! Loaded once at startup and replaced atomically through the API. Every
//! decision reads a snapshot, so a replace never tears a recognize call.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::RwLock;

use serde::{Deserialize, Serialize};
use turnstile_core::{GeoError, Site};

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("cannot read site registry {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("site registry {path} is not valid TOML: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("cannot write site registry {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("cannot encode site registry: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error(transparent)]
    Geo(#[from] GeoError),
    #[error("site {name:?} has non-positive radius {radius_m}")]
    BadRadius { name: String, radius_m: f64 },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SitesFile {
    #[serde(default)]
    sites: Vec<Site>,
}

#[derive(Debug)]
pub struct SiteRegistry {
    path: PathBuf,
    sites: RwLock<Vec<Site>>,
}

impl SiteRegistry {
    /// Load the registry from disk. A missing file is not an error — it
    /// yields an empty registry, which fail-closes every geofence check.
    pub fn open(path: &Path) -> Result<Self, SiteError> {
        let sites = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| SiteError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: SitesFile = toml::from_str(&raw).map_err(|source| SiteError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            validate(&file.sites)?;
            tracing::info!(path = %path.display(), count = file.sites.len(), "site registry loaded");
            file.sites
        } else {
            tracing::warn!(
                path = %path.display(),
                "no site registry file; every recognition will be denied (no_sites_configured)"
            );
            Vec::new()
        };

        Ok(SiteRegistry {
            path: path.to_path_buf(),
            sites: RwLock::new(sites),
        })
    }

    /// Current registry snapshot.
    pub async fn snapshot(&self) -> Vec<Site> {
        self.sites.read().await.clone()
    }

    /// Replace the whole registry, writing it back to disk first. A write
    /// failure leaves the in-memory registry untouched.
    pub async fn replace(&self, sites: Vec<Site>) -> Result<usize, SiteError> {
        validate(&sites)?;

        let body = toml::to_string_pretty(&SitesFile { sites: sites.clone() })?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SiteError::Write { path: self.path.clone(), source })?;
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|source| SiteError::Write { path: self.path.clone(), source })?;

        let count = sites.len();
        *self.sites.write().await = sites;
        tracing::info!(count, path = %self.path.display(), "site registry replaced");
        Ok(count)
    }
}

fn validate(sites: &[Site]) -> Result<(), SiteError> {
    for site in sites {
        site.center.validate()?;
        if !(site.radius_m > 0.0) {
            return Err(SiteError::BadRadius {
                name: site.name.clone(),
                radius_m: site.radius_m,
            });
        }
    }
    Ok(())
}
