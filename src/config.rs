// ⚙️ Configuration
// JSON file + environment overrides; every field has a default

use crate::db::TransactionOptions;
use crate::error::{ForensicsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "FORENSICS_CONFIG";
pub const DB_ENV: &str = "FORENSICS_DB";
pub const ADDR_ENV: &str = "FORENSICS_ADDR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForensicsConfig {
    pub database_path: PathBuf,
    pub server_addr: String,
    pub extraction: ExtractionConfig,
    pub detection: DetectionConfig,
    pub loans: LoanConfig,
}

impl Default for ForensicsConfig {
    fn default() -> Self {
        ForensicsConfig {
            database_path: PathBuf::from("forensics.db"),
            server_addr: "0.0.0.0:3000".to_string(),
            extraction: ExtractionConfig::default(),
            detection: DetectionConfig::default(),
            loans: LoanConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Serialized per-row metadata above this is skipped
    pub max_metadata_bytes: usize,
    pub max_wait_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            max_metadata_bytes: 5 * 1024,
            max_wait_ms: 60_000,
            timeout_ms: 90_000,
        }
    }
}

impl ExtractionConfig {
    pub fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            max_wait: Duration::from_millis(self.max_wait_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Max days between a general withdrawal and the collateral that follows it
    pub preference_window_days: i64,
    /// Max relative difference |collateral - withdrawal| / withdrawal
    pub amount_similarity: f64,
    pub slow_analysis_warn_ms: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            preference_window_days: 30,
            amount_similarity: 0.20,
            slow_analysis_warn_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanConfig {
    /// Deposits below this are never suspected loans
    pub suspect_min_amount: f64,
}

impl Default for LoanConfig {
    fn default() -> Self {
        LoanConfig {
            suspect_min_amount: 1_000_000.0,
        }
    }
}

impl ForensicsConfig {
    /// Load from a JSON file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ForensicsError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: ForensicsConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// `FORENSICS_CONFIG` file (if set), then `FORENSICS_DB` / `FORENSICS_ADDR` overrides
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(
            std::env::var(DB_ENV).ok().as_deref(),
            std::env::var(ADDR_ENV).ok().as_deref(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, database_path: Option<&str>, server_addr: Option<&str>) {
        if let Some(path) = database_path.filter(|p| !p.trim().is_empty()) {
            self.database_path = PathBuf::from(path.trim());
        }
        if let Some(addr) = server_addr.filter(|a| !a.trim().is_empty()) {
            self.server_addr = addr.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        if detection.preference_window_days <= 0 {
            return Err(ForensicsError::Config(
                "detection.preference_window_days must be positive".to_string(),
            ));
        }
        if !detection.amount_similarity.is_finite() || detection.amount_similarity < 0.0 {
            return Err(ForensicsError::Config(
                "detection.amount_similarity must be a non-negative number".to_string(),
            ));
        }
        if self.extraction.timeout_ms == 0 {
            return Err(ForensicsError::Config(
                "extraction.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !self.loans.suspect_min_amount.is_finite() {
            return Err(ForensicsError::Config(
                "loans.suspect_min_amount must be a number".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ForensicsConfig::default();
        assert_eq!(config.extraction.max_metadata_bytes, 5120);
        assert_eq!(config.detection.preference_window_days, 30);
        assert_eq!(config.detection.amount_similarity, 0.20);
        assert_eq!(
            config.extraction.transaction_options(),
            TransactionOptions {
                max_wait: Duration::from_secs(60),
                timeout: Duration::from_secs(90),
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "database_path": "/tmp/case.db", "detection": {{ "preference_window_days": 45 }} }}"#
        )
        .unwrap();

        let config = ForensicsConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/case.db"));
        assert_eq!(config.detection.preference_window_days, 45);
        assert_eq!(config.detection.amount_similarity, 0.20);
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "detection": {{ "preference_window_days": 0 }} }}"#).unwrap();
        assert!(matches!(
            ForensicsConfig::from_file(file.path()),
            Err(ForensicsError::Config(_))
        ));

        let mut config = ForensicsConfig::default();
        config.detection.amount_similarity = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = ForensicsConfig::from_file("/definitely/not/here.json");
        assert!(matches!(result, Err(ForensicsError::Config(_))));
    }

    #[test]
    fn test_overrides() {
        let mut config = ForensicsConfig::default();
        config.apply_overrides(Some(" other.db "), Some(""));
        assert_eq!(config.database_path, PathBuf::from("other.db"));
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }
}
