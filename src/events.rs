//! Event names published through the subscription registry.
//! Host events not listed here are published under whatever `type` the host sent.

pub const COMMAND_PROGRESS: &str = crate::protocol::COMMAND_PROGRESS;
pub const SELECTION_CHANGE: &str = "selection_change";
pub const DOCUMENT_CHANGE: &str = "document_change";
pub const HOST_CONNECTED: &str = "host_connected";
pub const HOST_DISCONNECTED: &str = "host_disconnected";
