use std::path::PathBuf;
use std::sync::atomic::AtomicU16;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::client::HostClient;
use crate::error::BridgeError;
use crate::executor::{Executor, NoHost};
use crate::progress::EventProgressSink;
use crate::registry::{DispatchContext, Registry};
use crate::settings::BridgeSettings;
use crate::subscriptions::EventRegistry;
use crate::transport::Connection;

// ── Bridge State ────────────────────────────────────────────────

/// State shared by the HTTP surface, the host listener and the CLI.
pub struct BridgeState {
    pub registry: Registry,
    pub settings: Arc<BridgeSettings>,
    pub events: Arc<EventRegistry>,
    pub config_dir: PathBuf,
    pub api_port: AtomicU16,
    /// The connected design host. A newer connection replaces an older one.
    host: Mutex<Option<Arc<HostClient>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub host_connected: bool,
    pub pending_requests: usize,
    pub commands: usize,
    pub subscriptions: usize,
}

impl BridgeState {
    pub fn new(settings: BridgeSettings, config_dir: PathBuf) -> Result<Self, BridgeError> {
        let registry = Registry::with_builtin(settings.duplicate_policy)?;
        Ok(Self {
            registry,
            settings: Arc::new(settings),
            events: Arc::new(EventRegistry::new()),
            config_dir,
            api_port: AtomicU16::new(0),
            host: Mutex::new(None),
        })
    }

    /// Start talking to a freshly connected host. Any previous host is
    /// dropped; requests already in flight on it finish on their own.
    pub fn attach_host(&self, conn: Connection) -> Arc<HostClient> {
        let client = HostClient::spawn(conn, Arc::clone(&self.events), self.settings.request_timeout());
        if self.host.lock().replace(Arc::clone(&client)).is_some() {
            info!("replaced previous design host connection");
        }
        client
    }

    /// The attached host, if it is still connected.
    pub fn host(&self) -> Option<Arc<HostClient>> {
        self.host.lock().as_ref().filter(|h| h.is_connected()).cloned()
    }

    fn context(&self) -> DispatchContext {
        let executor: Arc<dyn Executor> = match self.host() {
            Some(host) => host,
            None => Arc::new(NoHost),
        };
        DispatchContext {
            executor,
            progress: Arc::new(EventProgressSink::new(Arc::clone(&self.events))),
            settings: Arc::clone(&self.settings),
        }
    }

    /// Validate and run one command. Validation happens even without a host,
    /// so a bad call is reported as such rather than as `NotConnected`.
    pub async fn execute(&self, name: &str, params: Value) -> Result<Value, BridgeError> {
        self.registry.dispatch(name, params, &self.context()).await
    }

    pub fn notify(&self, message: &str) -> Result<(), BridgeError> {
        self.host().ok_or(BridgeError::NotConnected)?.notify(message)
    }

    pub fn update_host_settings(&self, settings: Map<String, Value>) -> Result<(), BridgeError> {
        self.host()
            .ok_or(BridgeError::NotConnected)?
            .update_settings(settings)
    }

    pub fn health(&self) -> Health {
        let host = self.host();
        Health {
            host_connected: host.is_some(),
            pending_requests: host.map_or(0, |h| h.pending_count()),
            commands: self.registry.len(),
            subscriptions: self.events.len(),
        }
    }
}
