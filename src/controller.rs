//! Call button state machine.
//!
//! `Ready → Dialing → Connected → Ready`, with `Dialing → Ready` when the
//! callee never answers or the user hangs up during setup. Every path back
//! to `Ready` stops the elapsed-time ticker and zeroes the counter.
use crate::callconfig::{CallConfigSource, CallParams, CallTarget};
use crate::device::{CallHandle, DeviceOptions, DeviceSession, OutgoingCall, TelephonyDevice};
use crate::event::{CallEvent, CallEventReceiver};
use crate::token::TokenSource;
use crate::view::{ButtonAppearance, CallView, Locale};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ready,
    Dialing,
    Connected,
}

/// What the controller holds between user clicks and vendor events.
#[derive(Default)]
pub struct CallSession {
    pub token: Option<String>,
    device: Option<Box<dyn DeviceSession>>,
    active_call: Option<Box<dyn CallHandle>>,
    events: Option<CallEventReceiver>,
    ticker: Option<Ticker>,
}

/// One-second repeating updater of the elapsed-time display.
struct Ticker {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn start(view: Arc<watch::Sender<CallView>>) -> Self {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let period = Duration::from_secs(1);
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        view.send_if_modified(|v| {
                            if token.is_cancelled() {
                                return false;
                            }
                            v.tick();
                            true
                        });
                    }
                }
            }
        });
        Self {
            cancel_token,
            handle,
        }
    }

    fn stop(self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}

enum SetupOutcome {
    Placed(OutgoingCall),
    Skipped,
    Cancelled,
}

pub struct CallController {
    device: Arc<dyn TelephonyDevice>,
    tokens: Arc<dyn TokenSource>,
    call_config: Arc<dyn CallConfigSource>,
    options: DeviceOptions,
    locale: Locale,
    state: CallState,
    session: CallSession,
    view: Arc<watch::Sender<CallView>>,
}

/// `None` when `abort` fired first.
async fn cancellable<F: Future>(abort: &CancellationToken, fut: F) -> Option<F::Output> {
    select! {
        _ = abort.cancelled() => None,
        output = fut => Some(output),
    }
}

impl CallController {
    pub fn new(
        device: Arc<dyn TelephonyDevice>,
        tokens: Arc<dyn TokenSource>,
        call_config: Arc<dyn CallConfigSource>,
        options: DeviceOptions,
        locale: Locale,
    ) -> Self {
        let (view, _) = watch::channel(CallView::idle());
        Self {
            device,
            tokens,
            call_config,
            options,
            locale,
            state: CallState::Ready,
            session: CallSession::default(),
            view: Arc::new(view),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.subscribe()
    }

    pub fn has_ticker(&self) -> bool {
        self.session.ticker.is_some()
    }

    pub fn has_active_call(&self) -> bool {
        self.session.active_call.is_some()
    }

    pub fn is_registered(&self) -> bool {
        self.session.device.is_some()
    }

    /// The call button: places a call when idle, hangs up otherwise.
    pub async fn click(&mut self, abort: &CancellationToken) {
        match self.state {
            CallState::Ready => {
                if let Err(e) = self.start_call(abort).await {
                    warn!("call attempt failed: {}", e);
                }
            }
            _ => self.hang_up().await,
        }
    }

    /// Ready → Dialing. Errors leave the controller in `Ready` with the idle view.
    pub async fn start_call(&mut self, abort: &CancellationToken) -> Result<()> {
        if self.state != CallState::Ready {
            return Err(anyhow!("controller: call already in progress"));
        }
        self.state = CallState::Dialing;
        let locale = self.locale;
        self.view.send_modify(|v| {
            v.set_button(ButtonAppearance::HangUp);
            v.status_text = locale.connecting().to_string();
        });

        match self.setup(abort).await {
            Ok(SetupOutcome::Placed(call)) => {
                if abort.is_cancelled() {
                    info!(call_id = call.handle.id(), "hangup requested while connecting");
                    if let Err(e) = call.handle.disconnect().await {
                        warn!("failed to disconnect call: {}", e);
                    }
                    self.end_call();
                    return Ok(());
                }
                info!(call_id = call.handle.id(), "dialing");
                self.session.active_call = Some(call.handle);
                self.session.events = Some(call.events);
                Ok(())
            }
            Ok(SetupOutcome::Skipped) => {
                self.end_call();
                Ok(())
            }
            Ok(SetupOutcome::Cancelled) => {
                info!("call setup cancelled");
                self.end_call();
                Ok(())
            }
            Err(e) => {
                self.end_call();
                Err(e)
            }
        }
    }

    async fn setup(&mut self, abort: &CancellationToken) -> Result<SetupOutcome> {
        info!("requesting access token");
        let token = match cancellable(abort, self.tokens.fetch_token()).await {
            Some(token) => token?,
            None => return Ok(SetupOutcome::Cancelled),
        };
        self.session.token = Some(token.clone());

        let target = match cancellable(abort, self.call_config.load()).await {
            Some(Ok(config)) => match config.target() {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!("{}", e);
                    None
                }
            },
            Some(Err(e)) => {
                warn!("failed to load call config: {}", e);
                None
            }
            None => return Ok(SetupOutcome::Cancelled),
        };

        match self.session.device.as_ref() {
            Some(device) => match cancellable(abort, device.update_token(&token)).await {
                Some(result) => result?,
                None => return Ok(SetupOutcome::Cancelled),
            },
            None => {
                let device = match cancellable(abort, self.device.register(&token, &self.options))
                    .await
                {
                    Some(device) => device?,
                    None => return Ok(SetupOutcome::Cancelled),
                };
                self.session.device = Some(device);
            }
        }

        self.place_outgoing(abort, target).await
    }

    async fn place_outgoing(
        &self,
        abort: &CancellationToken,
        target: Option<CallTarget>,
    ) -> Result<SetupOutcome> {
        let device = match self.session.device.as_ref() {
            Some(device) => device,
            None => {
                warn!("unable to make call, device not initialized");
                return Ok(SetupOutcome::Skipped);
            }
        };
        let target = match target {
            Some(target) => target,
            None => {
                warn!("unable to make call, no call target configured");
                return Ok(SetupOutcome::Skipped);
            }
        };
        let params = CallParams::from(&target);
        info!(to = %target, "attempting to call");
        match cancellable(abort, device.connect(&params)).await {
            Some(call) => Ok(SetupOutcome::Placed(call?)),
            None => Ok(SetupOutcome::Cancelled),
        }
    }

    /// Waits for the next event of the active call; never resolves when there is none.
    pub async fn next_event(&mut self) -> CallEvent {
        let events = match self.session.events.as_mut() {
            Some(events) => events,
            None => return futures::future::pending().await,
        };
        let received = events.recv().await;
        match received {
            Some(event) => event,
            None => {
                warn!("call event channel closed");
                self.session.events = None;
                if self.state == CallState::Connected {
                    CallEvent::Disconnect
                } else {
                    CallEvent::Cancel
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: CallEvent) {
        debug!(event = event.name(), state = ?self.state, "call event");
        match (event, self.state) {
            (CallEvent::Accept, CallState::Dialing) => {
                self.state = CallState::Connected;
                self.view.send_modify(|v| v.reset_elapsed());
                self.start_ticker();
                info!("call accepted");
            }
            (CallEvent::Cancel, CallState::Dialing | CallState::Connected) => {
                info!("call cancelled");
                self.end_call();
            }
            (CallEvent::Disconnect, CallState::Dialing | CallState::Connected) => {
                info!("call disconnected");
                self.end_call();
            }
            (event, state) => {
                debug!(event = event.name(), ?state, "ignored call event");
            }
        }
    }

    /// Explicit disconnect request from the user.
    pub async fn hang_up(&mut self) {
        if let Some(call) = self.session.active_call.as_ref() {
            info!(call_id = call.id(), "ending call");
            if let Err(e) = call.disconnect().await {
                warn!("failed to disconnect call: {}", e);
            }
        }
        if self.state != CallState::Ready {
            self.end_call();
        }
    }

    /// Unregisters the device session; the next attempt registers again.
    pub async fn shutdown(&mut self) {
        self.hang_up().await;
        if let Some(device) = self.session.device.take() {
            if let Err(e) = device.unregister().await {
                warn!("failed to unregister device: {}", e);
            }
        }
    }

    fn start_ticker(&mut self) {
        if let Some(ticker) = self.session.ticker.take() {
            ticker.stop();
        }
        self.session.ticker = Some(Ticker::start(self.view.clone()));
    }

    /// Back to `Ready`: stop the ticker, zero the counter, idle button, empty status.
    fn end_call(&mut self) {
        if let Some(ticker) = self.session.ticker.take() {
            ticker.stop();
        }
        self.session.active_call = None;
        self.session.events = None;
        self.state = CallState::Ready;
        self.view.send_replace(CallView::idle());
    }
}

impl Drop for CallController {
    fn drop(&mut self) {
        if let Some(ticker) = self.session.ticker.take() {
            ticker.stop();
        }
    }
}
