use std::sync::Arc;

use serde_json::Value;

use crate::protocol::{now_millis, ProgressEvent, ProgressStatus};
use crate::subscriptions::EventRegistry;

/// Where progress reports go: the subscription registry on the caller side,
/// the wire on the host side.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Publishes progress as `command_progress` events.
pub struct EventProgressSink {
    events: Arc<EventRegistry>,
}

impl EventProgressSink {
    pub fn new(events: Arc<EventRegistry>) -> Self {
        Self { events }
    }
}

impl ProgressSink for EventProgressSink {
    fn emit(&self, event: &ProgressEvent) {
        self.events
            .publish(crate::events::COMMAND_PROGRESS, &event.to_frame());
    }
}

/// Chunk position attached to `in_progress` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPosition {
    pub current: usize,
    pub total: usize,
    pub size: usize,
}

/// Builds the progress stream of one command. Progress never goes down and
/// `processed_items` never exceeds `total_items`, whatever the caller passes.
pub struct ProgressTracker {
    command_id: String,
    command_type: String,
    total_items: usize,
    progress: u8,
    processed: usize,
    finished: bool,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    pub fn new(command_id: &str, command_type: &str, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            command_id: command_id.to_string(),
            command_type: command_type.to_string(),
            total_items: 0,
            progress: 0,
            processed: 0,
            finished: false,
            sink,
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn set_total(&mut self, total: usize) {
        self.total_items = total;
        self.processed = self.processed.min(total);
    }

    pub fn started(&mut self, message: &str) {
        self.send(ProgressStatus::Started, 0, 0, message, None, None);
    }

    pub fn advance(
        &mut self,
        progress: u8,
        processed: usize,
        message: &str,
        chunk: Option<ChunkPosition>,
    ) {
        self.send(ProgressStatus::InProgress, progress, processed, message, chunk, None);
    }

    pub fn completed(&mut self, message: &str, payload: Value) {
        let total = self.total_items;
        self.send(ProgressStatus::Completed, 100, total, message, None, Some(payload));
    }

    pub fn failed(&mut self, message: &str) {
        let (progress, processed) = (self.progress, self.processed);
        self.send(ProgressStatus::Error, progress, processed, message, None, None);
    }

    fn send(
        &mut self,
        status: ProgressStatus,
        progress: u8,
        processed: usize,
        message: &str,
        chunk: Option<ChunkPosition>,
        payload: Option<Value>,
    ) {
        if self.finished {
            return;
        }
        self.progress = self.progress.max(progress.min(100));
        self.processed = self.processed.max(processed).min(self.total_items);
        self.finished = status.is_terminal();

        self.sink.emit(&ProgressEvent {
            command_id: self.command_id.clone(),
            command_type: self.command_type.clone(),
            status,
            progress: self.progress,
            total_items: self.total_items,
            processed_items: self.processed,
            message: message.to_string(),
            timestamp: now_millis(),
            current_chunk: chunk.map(|c| c.current),
            total_chunks: chunk.map(|c| c.total),
            chunk_size: chunk.map(|c| c.size),
            payload,
        });
    }
}
