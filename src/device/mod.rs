//! Boundary to the telephony vendor.
//!
//! A [`TelephonyDevice`] registers with a short-lived credential and yields a
//! [`DeviceSession`]; the session places outbound calls and hands back a
//! [`CallHandle`] together with the receiver of its lifecycle events
//! (`accept`, `disconnect`, `cancel`). The vendor's signaling and media stay
//! behind these traits.
use crate::callconfig::CallParams;
use crate::event::CallEventReceiver;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod rest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Opus,
    Pcmu,
    Pcma,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Opus => "opus",
            Codec::Pcmu => "pcmu",
            Codec::Pcma => "pcma",
        }
    }
}

/// Verbosity of the vendor client, 0 (trace) to 5 (silent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceLogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceOptions {
    pub log_level: DeviceLogLevel,
    /// Ordered by priority, first preferred
    pub codec_preferences: Vec<Codec>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            log_level: DeviceLogLevel::Debug,
            codec_preferences: vec![Codec::Opus, Codec::Pcmu],
        }
    }
}

/// An outbound call in progress.
pub struct OutgoingCall {
    pub handle: Box<dyn CallHandle>,
    pub events: CallEventReceiver,
}

#[async_trait]
pub trait TelephonyDevice: Send + Sync {
    async fn register(&self, token: &str, options: &DeviceOptions)
        -> Result<Box<dyn DeviceSession>>;
}

#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Replace the credential of a registered session
    async fn update_token(&self, token: &str) -> Result<()>;
    async fn connect(&self, params: &CallParams) -> Result<OutgoingCall>;
    async fn unregister(&self) -> Result<()>;
}

#[async_trait]
pub trait CallHandle: Send + Sync {
    fn id(&self) -> &str;
    /// Hang up; no further events are delivered afterwards
    async fn disconnect(&self) -> Result<()>;
}
