//! Operator Configuration
//!
//! Settings come from an optional YAML file, overridden by command-line
//! flags and environment variables in `main.rs`.

use crate::checks::version::Version;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Check Configuration
// =============================================================================

/// Probe thresholds and scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckConfig {
    /// Re-check interval while all checks pass
    pub interval_secs: u64,
    /// First re-check delay after a failing aggregate
    pub backoff_initial_secs: u64,
    /// Upper bound for the failure backoff
    pub backoff_max_secs: u64,
    /// Timeout applied to each probe
    pub probe_timeout_secs: u64,
    pub min_vcenter_version: Version,
    pub min_esxi_version: Version,
    /// Minimum VM hardware version (vmx-N)
    pub min_hardware_version: u32,
    /// Oldest vCenter/ESXi release without known migration bugs
    pub migration_safe_version: Version,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            backoff_initial_secs: 60,
            backoff_max_secs: 3 * 60 * 60,
            probe_timeout_secs: 30,
            min_vcenter_version: Version::new(6, 7, 3),
            min_esxi_version: Version::new(6, 7, 3),
            min_hardware_version: 15,
            migration_safe_version: Version::new(7, 0, 3),
        }
    }
}

impl CheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.backoff_initial_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

// =============================================================================
// vCenter Configuration
// =============================================================================

/// Connection settings for vCenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VCenterConfig {
    /// vCenter host name; falls back to the infrastructure metadata
    pub server: Option<String>,
    pub username: String,
    /// Never written back out
    #[serde(skip_serializing)]
    pub password: String,
    /// Skip TLS verification
    pub insecure: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for VCenterConfig {
    fn default() -> Self {
        Self {
            server: None,
            username: String::new(),
            password: String::new(),
            insecure: false,
            connect_timeout_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl VCenterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Operand Configuration
// =============================================================================

/// Default StorageClass created once the environment checks pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageClassConfig {
    pub name: String,
    pub storage_policy_name: Option<String>,
    pub is_default: bool,
}

impl Default for StorageClassConfig {
    fn default() -> Self {
        Self {
            name: "thin-csi".to_string(),
            storage_policy_name: None,
            is_default: true,
        }
    }
}

/// Where administrators acknowledge overridable upgrade blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminAckConfig {
    pub namespace: String,
    pub config_map: String,
}

impl Default for AdminAckConfig {
    fn default() -> Self {
        Self {
            namespace: "openshift-config".to_string(),
            config_map: "admin-acks".to_string(),
        }
    }
}

// =============================================================================
// Operator Configuration
// =============================================================================

/// Top-level operator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Prefix of the published condition types
    pub controller_name: String,
    /// Resync interval of the outer reconciliation loop
    pub resync_interval_secs: u64,
    pub checks: CheckConfig,
    pub vcenter: VCenterConfig,
    pub storage_class: StorageClassConfig,
    pub admin_ack: AdminAckConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            controller_name: "VMwareVSphereController".to_string(),
            resync_interval_secs: 60,
            checks: CheckConfig::default(),
            vcenter: VCenterConfig::default(),
            storage_class: StorageClassConfig::default(),
            admin_ack: AdminAckConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: OperatorConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.trim().is_empty() {
            return Err(Error::Configuration("controllerName must not be empty".into()));
        }
        if self.resync_interval_secs == 0 {
            return Err(Error::Configuration("resyncIntervalSecs must be positive".into()));
        }
        if self.checks.interval_secs == 0 || self.checks.backoff_initial_secs == 0 {
            return Err(Error::Configuration("check intervals must be positive".into()));
        }
        if self.checks.backoff_max_secs < self.checks.backoff_initial_secs {
            return Err(Error::Configuration(
                "backoffMaxSecs must not be smaller than backoffInitialSecs".into(),
            ));
        }
        if self.checks.probe_timeout_secs == 0 || self.vcenter.connect_timeout_secs == 0 {
            return Err(Error::Configuration("timeouts must be positive".into()));
        }
        if self.storage_class.name.trim().is_empty() {
            return Err(Error::Configuration("storageClass.name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OperatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.checks.min_vcenter_version, Version::new(6, 7, 3));
        assert_eq!(config.checks.interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
controllerName: TestController
checks:
  intervalSecs: 120
  minVcenterVersion: "7.0.0"
vcenter:
  server: vcenter.example.com
  username: administrator@vsphere.local
"#
        )
        .unwrap();

        let config = OperatorConfig::load(file.path()).unwrap();
        assert_eq!(config.controller_name, "TestController");
        assert_eq!(config.checks.interval_secs, 120);
        assert_eq!(config.checks.min_vcenter_version, Version::new(7, 0, 0));
        // Untouched fields keep their defaults
        assert_eq!(config.checks.min_hardware_version, 15);
        assert_eq!(config.vcenter.server.as_deref(), Some("vcenter.example.com"));
        assert_eq!(config.storage_class.name, "thin-csi");
    }

    #[test]
    fn test_invalid_version_in_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checks:\n  minEsxiVersion: latest").unwrap();
        assert_matches!(OperatorConfig::load(file.path()), Err(Error::YamlParse(_)));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = OperatorConfig::default();
        config.checks.backoff_max_secs = 10;
        assert_matches!(config.validate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_password_is_not_serialized() {
        let mut config = OperatorConfig::default();
        config.vcenter.password = "secret".into();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("secret"));
    }
}
