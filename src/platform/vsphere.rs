//! vCenter REST Adapter
//!
//! Talks to the vSphere Automation REST API (`/api`):
//! - session login with basic authentication
//! - appliance version
//! - ESXi host software versions
//! - VM hardware versions looked up by VM name

use crate::config::VCenterConfig;
use crate::domain::ports::{ConnectionFactory, HostInfo, VCenterAbout, VSphereConnection};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Header carrying the session token on every authenticated request
const SESSION_HEADER: &str = "vmware-api-session-id";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct HostSummary {
    host: String,
    name: String,
    #[serde(default)]
    connection_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HostSoftware {
    base_image: BaseImage,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseImage {
    version: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct VmHardware {
    version: String,
}

// =============================================================================
// Connection Factory
// =============================================================================

/// Opens REST sessions against one vCenter server
pub struct RestConnectionFactory {
    server: String,
    base_url: String,
    username: String,
    password: String,
    client: Client,
    request_timeout: Duration,
}

impl std::fmt::Debug for RestConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConnectionFactory")
            .field("server", &self.server)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RestConnectionFactory {
    pub fn new(server: impl Into<String>, config: &VCenterConfig) -> Result<Self> {
        let server = server.into();
        if server.trim().is_empty() {
            return Err(Error::Configuration("vCenter server must not be empty".into()));
        }

        let client = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url(&server),
            server,
            username: config.username.clone(),
            password: config.password.clone(),
            client,
            request_timeout: config.request_timeout(),
        })
    }
}

#[async_trait]
impl ConnectionFactory for RestConnectionFactory {
    async fn connect(&self) -> Result<Arc<dyn VSphereConnection>> {
        let url = format!("{}/api/session", self.base_url);
        debug!(server = %self.server, "Logging in to vCenter");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::VCenterAuthentication {
                    server: self.server.clone(),
                })
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::VCenterConnection {
                    server: self.server.clone(),
                    reason: format!("session login returned {}: {}", status, body),
                });
            }
            _ => {}
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let token = parse_session_token(&body)?;

        info!(server = %self.server, "vCenter session established");

        Ok(Arc::new(RestConnection {
            server: self.server.clone(),
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            token,
            request_timeout: self.request_timeout,
        }) as Arc<dyn VSphereConnection>)
    }
}

impl RestConnectionFactory {
    fn transport_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::VCenterTimeout(self.request_timeout)
        } else {
            Error::VCenterConnection {
                server: self.server.clone(),
                reason: e.to_string(),
            }
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Authenticated REST session
pub struct RestConnection {
    server: String,
    base_url: String,
    client: Client,
    token: String,
    request_timeout: Duration,
}

impl RestConnection {
    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header(SESSION_HEADER, &self.token)
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let response = self.get(path).send().await.map_err(|e| self.request_error(e))?;
        let response = self.check_status(operation, response).await?;
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        serde_json::from_str(&body).map_err(|e| Error::VCenterApi {
            operation: operation.to_string(),
            reason: format!("unexpected response: {}", e),
        })
    }

    async fn check_status(&self, operation: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::VCenterAuthentication {
                server: self.server.clone(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VCenterApi {
                operation: operation.to_string(),
                reason: format!("{} - {}", status, body),
            });
        }
        Ok(response)
    }

    fn request_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::VCenterTimeout(self.request_timeout)
        } else {
            Error::Http(e)
        }
    }
}

#[async_trait]
impl VSphereConnection for RestConnection {
    fn server(&self) -> &str {
        &self.server
    }

    async fn is_alive(&self) -> bool {
        match self.get("/api/session").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(server = %self.server, error = %e, "vCenter session check failed");
                false
            }
        }
    }

    async fn about(&self) -> Result<VCenterAbout> {
        self.get_json("get appliance version", "/api/appliance/system/version")
            .await
    }

    async fn list_hosts(&self) -> Result<Vec<HostInfo>> {
        let summaries: Vec<HostSummary> = self.get_json("list hosts", "/api/vcenter/host").await?;

        let mut hosts = Vec::with_capacity(summaries.len());
        for summary in connected_hosts(summaries) {
            let path = format!(
                "/api/esx/settings/hosts/{}/software",
                urlencoding::encode(&summary.host)
            );
            let software: HostSoftware = self.get_json("get host software", &path).await?;
            hosts.push(HostInfo {
                name: summary.name,
                version: software.base_image.version,
            });
        }
        Ok(hosts)
    }

    async fn vm_hardware_version(&self, vm_name: &str) -> Result<Option<String>> {
        let path = format!("/api/vcenter/vm?names={}", urlencoding::encode(vm_name));
        let vms: Vec<VmSummary> = self.get_json("find VM", &path).await?;

        let vm = match find_vm(vms, vm_name) {
            Some(vm) => vm,
            None => return Ok(None),
        };

        let path = format!("/api/vcenter/vm/{}/hardware", urlencoding::encode(&vm));
        let hardware: VmHardware = self.get_json("get VM hardware", &path).await?;
        Ok(Some(hardware.version))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn base_url(server: &str) -> String {
    let trimmed = server.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// The login response body is the token as a JSON string
fn parse_session_token(body: &str) -> Result<String> {
    let token: String = serde_json::from_str(body)?;
    if token.is_empty() {
        return Err(Error::VCenterApi {
            operation: "create session".into(),
            reason: "empty session token".into(),
        });
    }
    Ok(token)
}

/// Disconnected hosts cannot report a software version
fn connected_hosts(summaries: Vec<HostSummary>) -> impl Iterator<Item = HostSummary> {
    summaries.into_iter().filter(|h| {
        h.connection_state
            .as_deref()
            .map(|s| s == "CONNECTED")
            .unwrap_or(true)
    })
}

fn find_vm(vms: Vec<VmSummary>, vm_name: &str) -> Option<String> {
    vms.into_iter().find(|vm| vm.name == vm_name).map(|vm| vm.vm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{parse_hardware_version, Version};
    use assert_matches::assert_matches;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("vcenter.local"), "https://vcenter.local");
        assert_eq!(base_url("https://vcenter.local/"), "https://vcenter.local");
        assert_eq!(base_url("http://127.0.0.1:8989"), "http://127.0.0.1:8989");
    }

    #[test]
    fn test_session_token() {
        assert_eq!(parse_session_token("\"b00a8f3c\"").unwrap(), "b00a8f3c");
        assert_matches!(parse_session_token("\"\""), Err(Error::VCenterApi { .. }));
        assert_matches!(parse_session_token("{}"), Err(Error::JsonParse(_)));
    }

    #[test]
    fn test_appliance_version_response() {
        let about: VCenterAbout = serde_json::from_str(
            r#"{"version":"7.0.3.01000","build":"20395099","product":"VMware vCenter Server","type":"vCenter Server with an embedded Platform Services Controller"}"#,
        )
        .unwrap();
        assert_eq!(about.version.parse::<Version>().unwrap(), Version::new(7, 0, 3));
        assert_eq!(about.build, "20395099");
    }

    #[test]
    fn test_disconnected_hosts_are_skipped() {
        let summaries: Vec<HostSummary> = serde_json::from_str(
            r#"[
                {"host":"host-10","name":"esxi-1","connection_state":"CONNECTED","power_state":"POWERED_ON"},
                {"host":"host-11","name":"esxi-2","connection_state":"NOT_RESPONDING"},
                {"host":"host-12","name":"esxi-3"}
            ]"#,
        )
        .unwrap();
        let names: Vec<String> = connected_hosts(summaries).map(|h| h.name).collect();
        assert_eq!(names, vec!["esxi-1", "esxi-3"]);
    }

    #[test]
    fn test_host_software_version() {
        let software: HostSoftware = serde_json::from_str(
            r#"{"base_image":{"version":"7.0.3-0.50.20036589","display_name":"ESXi"},"components":{}}"#,
        )
        .unwrap();
        assert_eq!(
            software.base_image.version.parse::<Version>().unwrap(),
            Version::new(7, 0, 3)
        );
    }

    #[test]
    fn test_vm_lookup_and_hardware() {
        let vms: Vec<VmSummary> = serde_json::from_str(
            r#"[{"vm":"vm-42","name":"node-1","power_state":"POWERED_ON"},{"vm":"vm-43","name":"node-10"}]"#,
        )
        .unwrap();
        assert_eq!(find_vm(vms.clone(), "node-1").as_deref(), Some("vm-42"));
        assert_eq!(find_vm(vms, "node-2"), None);

        let hardware: VmHardware =
            serde_json::from_str(r#"{"version":"VMX_15","upgrade_policy":"NEVER"}"#).unwrap();
        assert_eq!(parse_hardware_version(&hardware.version).unwrap(), 15);
    }

    #[test]
    fn test_factory_requires_server() {
        assert_matches!(
            RestConnectionFactory::new("", &VCenterConfig::default()),
            Err(Error::Configuration(_))
        );
        assert!(RestConnectionFactory::new("vcenter.local", &VCenterConfig::default()).is_ok());
    }
}
