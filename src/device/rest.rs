//! Device backed by the vendor's REST call-control API.
//!
//! Registration verifies the access token and takes the account, API key and
//! client identity from its claims. Each outbound call is created through
//! `Calls.json` with instructions that bridge the callee to the registered
//! identity; a poll task turns status changes into call events.
use super::{CallHandle, DeviceOptions, DeviceSession, OutgoingCall, TelephonyDevice};
use crate::callconfig::CallParams;
use crate::config::TwilioConfig;
use crate::event::{call_event_channel, CallEvent, CallEventSender};
use crate::token::{self, AccessTokenClaims};
use crate::twiml::{self, DialTarget, Instruction};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct CallResource {
    pub sid: String,
    pub status: String,
}

pub struct RestDevice {
    client: Client,
    api_base: String,
    api_secret: String,
    caller_id: String,
    poll_interval: Duration,
}

#[derive(Debug, Clone)]
struct Credential {
    account_sid: String,
    api_key: String,
    identity: String,
}

struct RestSessionInner {
    client: Client,
    api_base: String,
    api_secret: String,
    caller_id: String,
    poll_interval: Duration,
    credential: RwLock<Credential>,
    cancel_token: CancellationToken,
}

pub struct RestSession {
    inner: Arc<RestSessionInner>,
}

struct RestCallInner {
    session: Arc<RestSessionInner>,
    credential: Credential,
    sid: String,
    answered: AtomicBool,
    cancel_token: CancellationToken,
}

pub struct RestCallHandle {
    inner: Arc<RestCallInner>,
}

impl RestDevice {
    pub fn new(client: Client, config: &TwilioConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_secret: config.api_secret.clone(),
            caller_id: config.caller_id.clone(),
            poll_interval: Duration::from_millis(config.status_poll_ms.max(100)),
        }
    }

    fn credential_from(&self, token: &str) -> Result<Credential> {
        let claims = token::verify(token, &self.api_secret)?;
        check_claims(&claims)?;
        Ok(Credential {
            account_sid: claims.sub,
            api_key: claims.iss,
            identity: claims.grants.identity,
        })
    }
}

fn check_claims(claims: &AccessTokenClaims) -> Result<()> {
    if claims.sub.is_empty() || claims.grants.identity.is_empty() {
        return Err(anyhow!("device: access token lacks account or identity"));
    }
    Ok(())
}

#[async_trait]
impl TelephonyDevice for RestDevice {
    async fn register(
        &self,
        token: &str,
        options: &DeviceOptions,
    ) -> Result<Box<dyn DeviceSession>> {
        let credential = self
            .credential_from(token)
            .map_err(|e| anyhow!("device: registration failed: {}", e))?;
        let codecs = options
            .codec_preferences
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(",");
        info!(
            identity = credential.identity,
            account = credential.account_sid,
            codecs,
            log_level = ?options.log_level,
            "device registered, ready to make calls"
        );
        Ok(Box::new(RestSession {
            inner: Arc::new(RestSessionInner {
                client: self.client.clone(),
                api_base: self.api_base.clone(),
                api_secret: self.api_secret.clone(),
                caller_id: self.caller_id.clone(),
                poll_interval: self.poll_interval,
                credential: RwLock::new(credential),
                cancel_token: CancellationToken::new(),
            }),
        }))
    }
}

impl RestSessionInner {
    fn calls_url(&self, account_sid: &str) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls.json", self.api_base, account_sid)
    }

    fn call_url(&self, account_sid: &str, sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, account_sid, sid
        )
    }

    fn credential(&self) -> Result<Credential> {
        self.credential
            .read()
            .map(|c| c.clone())
            .map_err(|_| anyhow!("device: credential lock poisoned"))
    }
}

#[async_trait]
impl DeviceSession for RestSession {
    async fn update_token(&self, token: &str) -> Result<()> {
        let claims = token::verify(token, &self.inner.api_secret)?;
        check_claims(&claims)?;
        let mut credential = self
            .inner
            .credential
            .write()
            .map_err(|_| anyhow!("device: credential lock poisoned"))?;
        credential.account_sid = claims.sub;
        credential.api_key = claims.iss;
        credential.identity = claims.grants.identity;
        debug!(identity = credential.identity, "device token updated");
        Ok(())
    }

    async fn connect(&self, params: &CallParams) -> Result<OutgoingCall> {
        if self.inner.cancel_token.is_cancelled() {
            return Err(anyhow!("device: session is unregistered"));
        }
        let to = params
            .to()
            .ok_or_else(|| anyhow!("device: missing To parameter"))?
            .to_string();
        let credential = self.inner.credential()?;
        let instructions = twiml::render(
            Instruction::Dial {
                caller_id: None,
                target: DialTarget::Client(&credential.identity),
            },
            false,
        )?;
        let mut form = vec![
            ("To".to_string(), to.clone()),
            ("From".to_string(), self.inner.caller_id.clone()),
            ("Twiml".to_string(), instructions),
        ];
        for (key, value) in params.0.iter().filter(|(k, _)| k.as_str() != "To") {
            form.push((key.clone(), value.clone()));
        }

        let response = self
            .inner
            .client
            .post(self.inner.calls_url(&credential.account_sid))
            .basic_auth(&credential.api_key, Some(&self.inner.api_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| anyhow!("device: create call failed: {}", e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "device: create call failed with status: {} {}",
                status,
                body
            ));
        }
        let call = response
            .json::<CallResource>()
            .await
            .map_err(|e| anyhow!("device: decode call failed: {}", e))?;
        info!(sid = call.sid, to, status = call.status, "outgoing call created");

        let inner = Arc::new(RestCallInner {
            session: self.inner.clone(),
            credential,
            sid: call.sid,
            answered: AtomicBool::new(false),
            cancel_token: self.inner.cancel_token.child_token(),
        });
        let (sender, events) = call_event_channel();
        tokio::spawn(poll_status(inner.clone(), sender));
        Ok(OutgoingCall {
            handle: Box::new(RestCallHandle { inner }),
            events,
        })
    }

    async fn unregister(&self) -> Result<()> {
        self.inner.cancel_token.cancel();
        info!("device unregistered");
        Ok(())
    }
}

/// Event to emit for a vendor call status, given whether the call was answered.
pub fn status_event(status: &str, answered: bool) -> Option<CallEvent> {
    match status {
        "in-progress" if !answered => Some(CallEvent::Accept),
        "completed" | "busy" | "no-answer" | "failed" | "canceled" => {
            if answered {
                Some(CallEvent::Disconnect)
            } else {
                Some(CallEvent::Cancel)
            }
        }
        _ => None,
    }
}

impl RestCallInner {
    async fn fetch_status(&self) -> Result<String> {
        let response = self
            .session
            .client
            .get(self.session.call_url(&self.credential.account_sid, &self.sid))
            .basic_auth(&self.credential.api_key, Some(&self.session.api_secret))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("status request failed: {}", response.status()));
        }
        Ok(response.json::<CallResource>().await?.status)
    }
}

/// Consecutive failed status fetches after which the call is given up.
const MAX_STATUS_FAILURES: u32 = 5;

async fn poll_status(call: Arc<RestCallInner>, sender: CallEventSender) {
    let mut interval = tokio::time::interval(call.session.poll_interval);
    let mut failures = 0;
    loop {
        select! {
            _ = call.cancel_token.cancelled() => {
                debug!(sid = call.sid, "status polling stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        let status = match call.fetch_status().await {
            Ok(status) => {
                failures = 0;
                status
            }
            Err(e) => {
                failures += 1;
                warn!(sid = call.sid, failures, "failed to fetch call status: {}", e);
                if failures < MAX_STATUS_FAILURES {
                    continue;
                }
                if call.cancel_token.is_cancelled() {
                    return;
                }
                let event = if call.answered.load(Ordering::SeqCst) {
                    CallEvent::Disconnect
                } else {
                    CallEvent::Cancel
                };
                error!(sid = call.sid, event = event.name(), "call status unreachable, giving up");
                call.cancel_token.cancel();
                sender.send(event).ok();
                return;
            }
        };
        let answered = call.answered.load(Ordering::SeqCst);
        let event = match status_event(&status, answered) {
            Some(event) => event,
            None => continue,
        };
        // a disconnect requested meanwhile suppresses further events
        if call.cancel_token.is_cancelled() {
            return;
        }
        info!(sid = call.sid, status, event = event.name(), "call status changed");
        if event == CallEvent::Accept {
            call.answered.store(true, Ordering::SeqCst);
        }
        if sender.send(event).is_err() || event.is_terminal() {
            call.cancel_token.cancel();
            return;
        }
    }
}

#[async_trait]
impl CallHandle for RestCallHandle {
    fn id(&self) -> &str {
        &self.inner.sid
    }

    async fn disconnect(&self) -> Result<()> {
        if self.inner.cancel_token.is_cancelled() {
            return Ok(());
        }
        self.inner.cancel_token.cancel();
        let status = if self.inner.answered.load(Ordering::SeqCst) {
            "completed"
        } else {
            "canceled"
        };
        let session = &self.inner.session;
        let response = session
            .client
            .post(session.call_url(&self.inner.credential.account_sid, &self.inner.sid))
            .basic_auth(&self.inner.credential.api_key, Some(&session.api_secret))
            .form(&[("Status", status)])
            .send()
            .await
            .map_err(|e| anyhow!("device: hangup failed: {}", e))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "device: hangup failed with status: {}",
                response.status()
            ));
        }
        info!(sid = self.inner.sid, status, "call disconnected");
        Ok(())
    }
}
