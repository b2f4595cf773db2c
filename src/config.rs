use crate::device::{Codec, DeviceLogLevel};
use crate::view::Locale;
use anyhow::Error;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::env;

const DEFAULT_IDENTITY: &str = "ai_avatar";

#[derive(Parser, Debug)]
#[command(version = crate::version::get_short_version(), long_version = crate::version::get_version_info())]
pub struct Cli {
    #[clap(long, default_value = "clicktocall.toml")]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Resolve a call-page link and place the call from the terminal
    Dial {
        /// Call page link, e.g. http://127.0.0.1:8080/phone#name=Sato&phone=0312345678
        link: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    /// `daily` rolls the log file at midnight, anything else writes one file
    pub log_rotation: Option<String>,
    pub locale: Locale,
    pub static_dir: String,
    /// Directory holding `contact_list.html` and `phone.html`
    pub template_dir: String,
    pub call_config_path: String,
    pub contact_list_path: String,
    /// Prefix added to numbers that do not start with `+`
    pub country_code: String,
    /// Origin used for directory links, e.g. `http://127.0.0.1:8080`
    pub public_url: Option<String>,
    /// Call page sessions not polled for this long are closed
    pub session_idle_secs: u64,
    pub twilio: TwilioConfig,
    pub dialer: DialerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub api_key: String,
    pub api_secret: String,
    pub twiml_app_sid: String,
    pub caller_id: String,
    pub identity: String,
    pub token_ttl_secs: u64,
    pub api_base: String,
    pub status_poll_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DialerConfig {
    /// Server hosting `/token` and the static call config
    pub server_url: String,
    pub log_level: DeviceLogLevel,
    pub codec_preferences: Vec<Codec>,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            twiml_app_sid: String::new(),
            caller_id: String::new(),
            identity: DEFAULT_IDENTITY.to_string(),
            token_ttl_secs: 3600,
            api_base: "https://api.twilio.com".to_string(),
            status_poll_ms: 1000,
        }
    }
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            log_level: DeviceLogLevel::Debug,
            codec_preferences: vec![Codec::Opus, Codec::Pcmu],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            log_rotation: None,
            locale: Locale::default(),
            static_dir: "static".to_string(),
            template_dir: "templates".to_string(),
            call_config_path: "static/config.yaml".to_string(),
            contact_list_path: "static/contact_list.xlsx".to_string(),
            country_code: "+81".to_string(),
            public_url: None,
            session_idle_secs: 60,
            twilio: TwilioConfig::default(),
            dialer: DialerConfig::default(),
        }
    }
}

impl TwilioConfig {
    /// Vendor credentials may come from the environment (`.env`) instead of the config file.
    pub fn apply_env(&mut self) {
        let overrides = [
            ("TWILIO_ACCOUNT_SID", &mut self.account_sid),
            ("TWILIO_API_KEY", &mut self.api_key),
            ("TWILIO_API_SECRET", &mut self.api_secret),
            ("TWILIO_TWIML_APP_SID", &mut self.twiml_app_sid),
            ("TWILIO_CALLER_ID", &mut self.caller_id),
        ];
        for (key, field) in overrides {
            if let Ok(value) = env::var(key) {
                if !value.is_empty() {
                    *field = value;
                }
            }
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.account_sid.is_empty() && !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }
}
