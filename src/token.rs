use crate::config::TwilioConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

const TOKEN_CONTENT_TYPE: &str = "twilio-fpa;v=1";

/// Body of `GET /token`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub identity: Option<String>,
    pub token: String,
}

/// Supplies the short-lived credential a device registers with.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<String>;
}

/// Requests a token from the server, once per call attempt. No retry, no cache.
pub struct TokenClient {
    client: Client,
    url: String,
}

impl TokenClient {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl TokenSource for TokenClient {
    async fn fetch_token(&self) -> Result<String> {
        info!("requesting access token from {}", self.url);
        let start_time = Instant::now();
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| anyhow!("token: request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "token: request failed with status: {}",
                response.status()
            ));
        }
        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| anyhow!("token: decode failed: {}", e))?;
        info!(
            identity = body.identity.as_deref().unwrap_or_default(),
            elapsed = start_time.elapsed().as_millis(),
            "got a token"
        );
        Ok(body.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingGrant {
    pub allow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingGrant {
    pub application_sid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceGrant {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incoming: Option<IncomingGrant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outgoing: Option<OutgoingGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    pub identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceGrant>,
}

/// Claims of the vendor's access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub jti: String,
    /// API key sid
    pub iss: String,
    /// Account sid
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub grants: Grants,
}

/// Mints access tokens carrying a voice grant, signed with the API secret (HS256).
pub struct AccessTokenIssuer {
    account_sid: String,
    api_key: String,
    has_secret: bool,
    encoding_key: EncodingKey,
    twiml_app_sid: String,
    identity: String,
    ttl_secs: u64,
}

impl AccessTokenIssuer {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            account_sid: config.account_sid.clone(),
            api_key: config.api_key.clone(),
            has_secret: !config.api_secret.is_empty(),
            encoding_key: EncodingKey::from_secret(config.api_secret.as_bytes()),
            twiml_app_sid: config.twiml_app_sid.clone(),
            identity: config.identity.clone(),
            ttl_secs: config.token_ttl_secs,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn issue(&self) -> Result<String> {
        self.issue_at(chrono::Utc::now().timestamp())
    }

    pub fn issue_at(&self, now: i64) -> Result<String> {
        if !self.has_secret {
            return Err(anyhow!("token: api secret is not configured"));
        }
        let mut header = Header::new(Algorithm::HS256);
        header.cty = Some(TOKEN_CONTENT_TYPE.to_string());
        let claims = AccessTokenClaims {
            jti: format!("{}-{}", self.api_key, now),
            iss: self.api_key.clone(),
            sub: self.account_sid.clone(),
            iat: now,
            exp: now + self.ttl_secs as i64,
            grants: Grants {
                identity: self.identity.clone(),
                voice: Some(VoiceGrant {
                    incoming: Some(IncomingGrant { allow: true }),
                    outgoing: Some(OutgoingGrant {
                        application_sid: self.twiml_app_sid.clone(),
                    }),
                }),
            },
        };
        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| anyhow!("token: signing failed: {}", e))
    }
}

#[async_trait]
impl TokenSource for AccessTokenIssuer {
    async fn fetch_token(&self) -> Result<String> {
        self.issue()
    }
}

/// Checks the HS256 signature and expiry, returns the claims.
pub fn verify(token: &str, secret: &str) -> Result<AccessTokenClaims> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| anyhow!("token: invalid access token: {}", e))?;
    Ok(data.claims)
}
