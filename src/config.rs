// ⚙️ Configuration - sources, download form, county universe and filter bounds
// Loaded once at startup; the built-in defaults ship inside the binary

use crate::error::IbsgError;
use crate::records::BerAttribute;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const BUILTIN_DEFAULTS: &str = include_str!("../config/defaults.json");

// ============================================================================
// SOURCES
// ============================================================================

/// Where a dataset comes from and what the cleaned output is called
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSource {
    /// Remote location; empty when the file must be provided locally
    pub url: String,

    /// File name inside the data directory
    pub filename: String,

    /// Default output file name
    pub output: String,
}

impl DatasetSource {
    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// The form POSTed to the BER register to download the full extract
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DownloadForm {
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

// ============================================================================
// BOUNDS
// ============================================================================

/// Lower/upper bound pair of a range filter; either side may be absent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ub: Option<f64>,
}

impl Bounds {
    pub fn new(lb: Option<f64>, ub: Option<f64>) -> Self {
        Bounds { lb, ub }
    }

    pub fn validate(&self, name: &str) -> Result<(), IbsgError> {
        if let (Some(lb), Some(ub)) = (self.lb, self.ub) {
            if lb >= ub {
                return Err(IbsgError::InvalidBounds { filter: name.to_string(), lb, ub });
            }
        }
        Ok(())
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub postcode_bers: DatasetSource,
    pub small_area_bers: DatasetSource,
    pub census_buildings: DatasetSource,

    pub download: DownloadForm,

    /// Every county / postcode label a user can select
    pub countyname: Vec<String>,

    /// Default bounds keyed by BER column name
    pub bounds: BTreeMap<String, Bounds>,

    /// Header renames applied to small-area BER extracts
    #[serde(default)]
    pub small_area_column_mappings: BTreeMap<String, String>,

    #[serde(default = "default_placeholder")]
    pub placeholder_period_built: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_timeout")]
    pub http_timeout_secs: u64,
}

fn default_placeholder() -> String {
    "not stated".to_string()
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_timeout() -> u64 {
    300
}

impl Config {
    /// The defaults compiled into the binary
    pub fn builtin() -> Result<Self> {
        let config: Config =
            serde_json::from_str(BUILTIN_DEFAULTS).context("Failed to parse built-in defaults")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON: {:?}", path.as_ref()))?;

        config.validate()?;
        Ok(config)
    }

    /// File if given, built-in defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::builtin(),
        }
    }

    /// Reject bounds on unknown columns and inverted bound pairs
    pub fn validate(&self) -> Result<()> {
        for (column, bounds) in &self.bounds {
            if BerAttribute::from_column(column).is_none() {
                return Err(IbsgError::UnknownFilter(column.clone()).into());
            }
            bounds.validate(column)?;
        }
        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than zero");
        }
        Ok(())
    }

    pub fn bounds_for(&self, attribute: BerAttribute) -> Bounds {
        self.bounds.get(attribute.column()).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_defaults_parse() {
        let config = Config::builtin().unwrap();

        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.placeholder_period_built, "not stated");
        assert!(config.countyname.iter().any(|c| c == "Dublin 11"));
        assert_eq!(
            config.bounds_for(BerAttribute::GroundFloorArea),
            Bounds::new(Some(0.0), Some(1000.0))
        );
        assert_eq!(
            config.bounds_for(BerAttribute::DeclaredLossFactor),
            Bounds::new(None, Some(20.0))
        );
    }

    #[test]
    fn test_from_file_rejects_unknown_bound_column() {
        let mut config = Config::builtin().unwrap();
        config.bounds.insert("FloorColour".to_string(), Bounds::new(Some(1.0), None));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("FloorColour"));
    }

    #[test]
    fn test_inverted_bounds_are_invalid() {
        let bounds = Bounds::new(Some(10.0), Some(5.0));
        assert!(bounds.validate("GroundFloorArea").is_err());
        assert!(Bounds::new(Some(5.0), None).validate("x").is_ok());
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file("/nonexistent/ibsg.json").unwrap_err();
        assert!(format!("{:?}", err).contains("ibsg.json"));
    }
}
