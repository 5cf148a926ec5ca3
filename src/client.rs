//! Caller side of the host connection.
//!
//! One router task owns the inbound half and partitions frames: replies
//! resolve correlation entries, progress extends deadlines and is published,
//! anything else is published as a host event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationTable;
use crate::error::BridgeError;
use crate::events::{COMMAND_PROGRESS, HOST_CONNECTED, HOST_DISCONNECTED};
use crate::executor::Executor;
use crate::protocol::{Inbound, Outbound};
use crate::subscriptions::EventRegistry;
use crate::transport::{Connection, FrameSender};

/// How often entries whose caller went away are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct HostClient {
    sender: FrameSender,
    pending: Arc<CorrelationTable>,
    connected: Arc<AtomicBool>,
    default_timeout: Duration,
}

impl HostClient {
    /// Take over a connection and start its router task.
    pub fn spawn(conn: Connection, events: Arc<EventRegistry>, default_timeout: Duration) -> Arc<Self> {
        let Connection { sender, inbound } = conn;
        let pending = Arc::new(CorrelationTable::new());
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(route(
            inbound,
            Arc::clone(&pending),
            Arc::clone(&events),
            Arc::clone(&connected),
        ));
        info!("design host connected");
        events.publish(HOST_CONNECTED, &json!({ "type": HOST_CONNECTED }));

        Arc::new(Self {
            sender,
            pending,
            connected,
            default_timeout,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send one `execute-command` and wait for its reply.
    ///
    /// The timeout is advisory: when it fires the caller stops waiting, but
    /// the host is not told and may still apply the command. A
    /// `command_progress` for this request pushes the deadline out.
    pub async fn request(
        &self,
        command: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        let started = tokio::time::Instant::now();
        let (id, mut rx) = self.pending.register(command, timeout);
        let frame = serde_json::to_value(Outbound::ExecuteCommand {
            id: id.clone(),
            command: command.to_string(),
            params,
        })?;
        if let Err(e) = self.sender.send(frame) {
            self.pending.forget(&id);
            return Err(e);
        }
        debug!(id = %id, command, "request sent");

        loop {
            let Some(deadline) = self.pending.deadline(&id) else {
                // Answered (or torn down) already; the reply is in the channel.
                return rx.await.unwrap_or(Err(BridgeError::Disconnected));
            };
            match tokio::time::timeout_at(deadline, &mut rx).await {
                Ok(reply) => return reply.unwrap_or(Err(BridgeError::Disconnected)),
                Err(_) => {
                    if self.pending.expire(&id, deadline) {
                        let after_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                        warn!(id = %id, command, after_ms, "request timed out");
                        return Err(BridgeError::Timeout {
                            command: command.to_string(),
                            id,
                            after_ms,
                        });
                    }
                }
            }
        }
    }

    /// Forward settings keys to the host. No reply.
    pub fn update_settings(&self, settings: Map<String, Value>) -> Result<(), BridgeError> {
        self.send_admin(&Outbound::UpdateSettings { settings })
    }

    /// Show a message in the host UI. No reply.
    pub fn notify(&self, message: &str) -> Result<(), BridgeError> {
        self.send_admin(&Outbound::Notify {
            message: message.to_string(),
        })
    }

    pub fn close_plugin(&self) -> Result<(), BridgeError> {
        self.send_admin(&Outbound::ClosePlugin)
    }

    fn send_admin(&self, frame: &Outbound) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::NotConnected);
        }
        self.sender.send(serde_json::to_value(frame)?)
    }
}

#[async_trait]
impl Executor for HostClient {
    async fn execute(
        &self,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BridgeError> {
        self.request(command, params, timeout.unwrap_or(self.default_timeout))
            .await
    }
}

async fn route(
    mut inbound: mpsc::UnboundedReceiver<Value>,
    pending: Arc<CorrelationTable>,
    events: Arc<EventRegistry>,
    connected: Arc<AtomicBool>,
) {
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.tick().await;

    loop {
        tokio::select! {
            frame = inbound.recv() => {
                let Some(frame) = frame else { break };
                dispatch_frame(frame, &pending, &events);
            }
            _ = sweep.tick() => {
                let swept = pending.sweep_abandoned();
                if swept > 0 {
                    debug!(swept, "swept abandoned requests");
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
    let failed = pending.fail_all(&BridgeError::Disconnected);
    info!(failed, "design host disconnected");
    events.publish(HOST_DISCONNECTED, &json!({ "type": HOST_DISCONNECTED }));
}

fn dispatch_frame(frame: Value, pending: &CorrelationTable, events: &EventRegistry) {
    match Inbound::classify(frame) {
        Ok(Inbound::CommandResult { id, result }) => {
            debug!(id = %id, "command result");
            pending.resolve(&id, Ok(result));
        }
        Ok(Inbound::CommandError { id, error }) => {
            debug!(id = %id, error = %error, "command error");
            pending.reject(&id, error);
        }
        Ok(Inbound::Progress(progress)) => {
            debug!(
                id = %progress.command_id,
                status = ?progress.status,
                progress = progress.progress,
                "command progress"
            );
            pending.extend(&progress.command_id);
            events.publish(COMMAND_PROGRESS, &progress.to_frame());
        }
        Ok(Inbound::Event { event_type, payload }) => {
            debug!(event_type = %event_type, "host event");
            events.publish(&event_type, &payload);
        }
        Err(reason) => {
            let err = BridgeError::Channel { message: reason };
            warn!(error = %err, "dropping unroutable frame");
        }
    }
}
