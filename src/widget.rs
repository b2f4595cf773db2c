//! Runs a [`CallController`] in its own task so clicks coming from HTTP
//! handlers or the terminal, and events coming from the device, are handled
//! one at a time. Each open call page owns one widget through [`WidgetSessions`].
use crate::controller::{CallController, CallState};
use crate::view::CallView;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetCommand {
    Click,
    HangUp,
}

#[derive(Clone)]
pub struct CallWidget {
    commands: mpsc::UnboundedSender<WidgetCommand>,
    view: watch::Receiver<CallView>,
    state: watch::Receiver<CallState>,
}

impl CallWidget {
    pub fn spawn(controller: CallController, cancel_token: CancellationToken) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_sender, state) = watch::channel(controller.state());
        let view = controller.subscribe();
        tokio::spawn(serve(controller, receiver, state_sender, cancel_token));
        Self {
            commands,
            view,
            state,
        }
    }

    pub fn send(&self, command: WidgetCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("widget: controller task has stopped"))
    }

    pub fn click(&self) -> Result<()> {
        self.send(WidgetCommand::Click)
    }

    pub fn hang_up(&self) -> Result<()> {
        self.send(WidgetCommand::HangUp)
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state.clone()
    }
}

async fn serve(
    mut controller: CallController,
    mut commands: mpsc::UnboundedReceiver<WidgetCommand>,
    state: watch::Sender<CallState>,
    cancel_token: CancellationToken,
) {
    loop {
        select! {
            _ = cancel_token.cancelled() => {
                info!("widget: shutting down");
                break;
            }
            command = commands.recv() => {
                let command = match command {
                    Some(command) => command,
                    None => break,
                };
                debug!(?command, state = ?controller.state(), "widget command");
                match (command, controller.state()) {
                    (WidgetCommand::Click, CallState::Ready) => {
                        publish_state(&state, CallState::Dialing);
                        place_call(&mut controller, &mut commands, &cancel_token).await;
                    }
                    (_, CallState::Ready) => {}
                    _ => controller.hang_up().await,
                }
            }
            event = controller.next_event() => {
                controller.handle_event(event).await;
            }
        }
        publish_state(&state, controller.state());
    }
    controller.shutdown().await;
    publish_state(&state, controller.state());
}

fn publish_state(state: &watch::Sender<CallState>, next: CallState) {
    state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Any command that arrives while the call is being set up aborts the setup.
async fn place_call(
    controller: &mut CallController,
    commands: &mut mpsc::UnboundedReceiver<WidgetCommand>,
    cancel_token: &CancellationToken,
) {
    let abort = cancel_token.child_token();
    let setup = controller.click(&abort);
    tokio::pin!(setup);
    loop {
        select! {
            _ = &mut setup => break,
            command = commands.recv() => {
                info!(?command, "widget: aborting call setup");
                abort.cancel();
                if command.is_none() {
                    (&mut setup).await;
                    break;
                }
            }
        }
    }
}

struct WidgetSlot {
    widget: CallWidget,
    cancel_token: CancellationToken,
    last_seen: Instant,
}

/// Call widgets keyed by session id, one per open call page.
pub struct WidgetSessions {
    new_controller: Box<dyn Fn() -> CallController + Send + Sync>,
    idle_timeout: Duration,
    cancel_token: CancellationToken,
    slots: Mutex<HashMap<String, WidgetSlot>>,
}

impl WidgetSessions {
    pub fn new(
        new_controller: impl Fn() -> CallController + Send + Sync + 'static,
        idle_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            new_controller: Box::new(new_controller),
            idle_timeout,
            cancel_token,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open(&self) -> (String, CallWidget) {
        let id = Uuid::new_v4().to_string();
        let cancel_token = self.cancel_token.child_token();
        let widget = CallWidget::spawn((self.new_controller)(), cancel_token.clone());
        let mut slots = self.slots.lock().await;
        slots.insert(
            id.clone(),
            WidgetSlot {
                widget: widget.clone(),
                cancel_token,
                last_seen: Instant::now(),
            },
        );
        info!(session = %id, sessions = slots.len(), "widget session opened");
        (id, widget)
    }

    /// Looks a session up and marks it as seen.
    pub async fn get(&self, id: &str) -> Option<CallWidget> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(id)?;
        slot.last_seen = Instant::now();
        Some(slot.widget.clone())
    }

    /// Stops the session's widget, hanging up any call it holds.
    pub async fn close(&self, id: &str) -> bool {
        match self.slots.lock().await.remove(id) {
            Some(slot) => {
                slot.cancel_token.cancel();
                info!(session = id, "widget session closed");
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Closes every session not seen within the idle timeout.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|id, slot| {
            let idle = now.duration_since(slot.last_seen) >= self.idle_timeout;
            if idle {
                slot.cancel_token.cancel();
                info!(session = %id, state = ?slot.widget.state(), "widget session evicted");
            }
            !idle
        });
        before - slots.len()
    }

    /// Evicts idle sessions until the parent token is cancelled.
    pub async fn sweep(self: Arc<Self>) {
        let period = (self.idle_timeout / 2).max(Duration::from_millis(100));
        let mut interval = tokio::time::interval(period);
        loop {
            select! {
                _ = self.cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = self.evict_idle().await;
                    if evicted > 0 {
                        debug!(evicted, "idle widget sessions closed");
                    }
                }
            }
        }
    }
}
