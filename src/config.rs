use anyhow::{Context, Result, bail};
use log::info;
use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use crate::coordinates::ServiceArea;

/// Environment variable naming a JSON configuration file
pub const CONFIG_ENV: &str = "FARECAST_CONFIG";

/// Fare service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,
    /// Road graph cache file
    pub graph_cache_path: PathBuf,
    /// OpenStreetMap extract used when the cache is missing
    pub osm_pbf_path: Option<PathBuf>,
    /// XGBoost model saved as JSON
    pub model_path: PathBuf,
    /// Bounding box trips must start and end in
    pub service_area: ServiceArea,
    /// Predictions below this are raised to it
    pub minimum_fare: f64,
    pub request_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            graph_cache_path: PathBuf::from("nyc_graph.bin"),
            osm_pbf_path: None,
            model_path: PathBuf::from("xgb_fare_model.json"),
            service_area: ServiceArea::default(),
            minimum_fare: 2.50,
            request_timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Defaults, then the file named by `FARECAST_CONFIG`, then the
    /// per-field environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("FARECAST_BIND") {
            self.bind_addr = addr
                .parse()
                .with_context(|| format!("Invalid FARECAST_BIND address: {}", addr))?;
        }
        if let Some(path) = lookup("FARECAST_GRAPH") {
            self.graph_cache_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("FARECAST_OSM") {
            self.osm_pbf_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("FARECAST_MODEL") {
            self.model_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.service_area.is_well_formed() {
            bail!("Service area bounds are invalid: {:?}", self.service_area);
        }
        if !self.minimum_fare.is_finite() || self.minimum_fare < 0.0 {
            bail!("Minimum fare must be a non-negative number");
        }
        if self.request_timeout_secs == 0 {
            bail!("Request timeout must be at least one second");
        }
        Ok(())
    }
}
