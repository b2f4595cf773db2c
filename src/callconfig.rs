//! Call configuration: a small YAML document deciding whether the call button
//! dials a phone number or a named client endpoint.
//!
//! ```yaml
//! callMode: phone        # or "client"
//! phoneNumber: "+81312345678"
//! clientName: reception
//! ```
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallConfig {
    pub call_mode: Option<String>,
    pub phone_number: Option<String>,
    pub client_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Phone(String),
    Client(String),
}

/// Parameter bag handed to the device's outbound call operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallParams(pub HashMap<String, String>);

impl CallConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document is a config without a mode
        let config: Option<CallConfig> = serde_yaml::from_str(text)
            .map_err(|e| anyhow!("callconfig: invalid yaml: {}", e))?;
        Ok(config.unwrap_or_default())
    }

    pub fn target(&self) -> Result<CallTarget> {
        match self.call_mode.as_deref() {
            Some("phone") => match self.phone_number.as_deref() {
                Some(number) if !number.trim().is_empty() => {
                    Ok(CallTarget::Phone(number.trim().to_string()))
                }
                _ => Err(anyhow!("callconfig: callMode is phone but phoneNumber is missing")),
            },
            Some("client") => match self.client_name.as_deref() {
                Some(name) if !name.trim().is_empty() => {
                    Ok(CallTarget::Client(name.trim().to_string()))
                }
                _ => Err(anyhow!("callconfig: callMode is client but clientName is missing")),
            },
            Some(mode) => Err(anyhow!(
                "callconfig: invalid callMode {:?} (use 'phone' or 'client')",
                mode
            )),
            None => Err(anyhow!("callconfig: callMode is missing (use 'phone' or 'client')")),
        }
    }
}

impl CallTarget {
    /// Value of the `To` parameter
    pub fn to_param(&self) -> String {
        match self {
            CallTarget::Phone(number) => number.clone(),
            CallTarget::Client(name) => format!("client:{}", name),
        }
    }
}

impl std::fmt::Display for CallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_param())
    }
}

impl CallParams {
    pub fn to(&self) -> Option<&str> {
        self.0.get("To").map(|s| s.as_str())
    }
}

impl From<&CallTarget> for CallParams {
    fn from(target: &CallTarget) -> Self {
        let mut params = HashMap::new();
        params.insert("To".to_string(), target.to_param());
        CallParams(params)
    }
}

/// Where the call config is read from. Every call attempt loads it again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CallConfigSource: Send + Sync {
    async fn load(&self) -> Result<CallConfig>;
}

/// Fetches the config as a static asset from the server.
pub struct HttpCallConfigSource {
    client: Client,
    url: String,
}

impl HttpCallConfigSource {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl CallConfigSource for HttpCallConfigSource {
    async fn load(&self) -> Result<CallConfig> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| anyhow!("callconfig: fetch {} failed: {}", self.url, e))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "callconfig: fetch {} failed with status: {}",
                self.url,
                response.status()
            ));
        }
        let text = response.text().await?;
        let config = CallConfig::from_yaml(&text)?;
        info!(url = self.url, mode = ?config.call_mode, "call config loaded");
        Ok(config)
    }
}

/// Reads the config from a local file.
pub struct FileCallConfigSource {
    path: PathBuf,
}

impl FileCallConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CallConfigSource for FileCallConfigSource {
    async fn load(&self) -> Result<CallConfig> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| anyhow!("callconfig: {}: {}", e, self.path.display()))?;
        CallConfig::from_yaml(&text)
    }
}
