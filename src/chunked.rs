//! Chunked execution of long-running work with progress streaming.
//!
//! A run is an enumeration pass followed by per-item processing in fixed-size
//! chunks. The first 5% of the progress range belongs to enumeration, the
//! chunks share 5..95, and completion jumps to 100.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;

use crate::error::BridgeError;
use crate::progress::{ChunkPosition, ProgressTracker};

const ENUMERATION_SHARE: usize = 5;
const CHUNK_SHARE: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunk_size: usize,
    /// Pause between items of one chunk.
    pub item_delay: Duration,
    /// Pause between chunks, giving the host's UI thread room.
    pub chunk_delay: Duration,
}

impl ChunkPlan {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            item_delay: Duration::ZERO,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_delays(mut self, item_delay: Duration, chunk_delay: Duration) -> Self {
        self.item_delay = item_delay;
        self.chunk_delay = chunk_delay;
        self
    }

    pub fn chunk_count(&self, items: usize) -> usize {
        items.div_ceil(self.chunk_size.max(1))
    }
}

/// Outcome of one item. Failures are recorded here and never abort the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult<O> {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<O>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedReport<O> {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub chunks: usize,
    pub items: Vec<ItemResult<O>>,
}

pub struct ChunkedRunner {
    plan: ChunkPlan,
}

impl ChunkedRunner {
    pub fn new(plan: ChunkPlan) -> Self {
        Self { plan }
    }

    /// Run `enumerate`, then `process` for every item it produced.
    ///
    /// Emits `started`, one `in_progress` per chunk boundary and `completed`
    /// carrying the item results. An enumeration error emits `error` and is
    /// returned as is.
    pub async fn run<T, O, E, P, Fut>(
        &self,
        tracker: &mut ProgressTracker,
        enumerate: E,
        mut process: P,
    ) -> Result<ChunkedReport<O>, BridgeError>
    where
        E: Future<Output = Result<Vec<T>, BridgeError>>,
        P: FnMut(T) -> Fut,
        Fut: Future<Output = Result<O, String>>,
        O: Serialize,
    {
        tracker.started("Enumerating items");
        let items = match enumerate.await {
            Ok(items) => items,
            Err(e) => {
                tracker.failed(&e.to_string());
                return Err(e);
            }
        };

        let total = items.len();
        let size = self.plan.chunk_size.max(1);
        let total_chunks = self.plan.chunk_count(total);
        tracker.set_total(total);

        let mut results = Vec::with_capacity(total);
        let mut items = items.into_iter().enumerate().peekable();
        let mut chunk = 0;
        while items.peek().is_some() {
            if chunk > 0 {
                pause(self.plan.chunk_delay).await;
            }
            let progress = ENUMERATION_SHARE + CHUNK_SHARE * chunk / total_chunks;
            tracker.advance(
                u8::try_from(progress).unwrap_or(100),
                results.len(),
                &format!("Processing chunk {}/{}", chunk + 1, total_chunks),
                Some(ChunkPosition {
                    current: chunk + 1,
                    total: total_chunks,
                    size,
                }),
            );

            for slot in 0..size {
                let Some((index, item)) = items.next() else {
                    break;
                };
                if slot > 0 {
                    pause(self.plan.item_delay).await;
                }
                results.push(match process(item).await {
                    Ok(value) => ItemResult {
                        index,
                        success: true,
                        result: Some(value),
                        error: None,
                    },
                    Err(error) => ItemResult {
                        index,
                        success: false,
                        result: None,
                        error: Some(error),
                    },
                });
            }
            chunk += 1;
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let report = ChunkedReport {
            total_items: total,
            succeeded,
            failed: total - succeeded,
            chunks: total_chunks,
            items: results,
        };
        let payload = serde_json::to_value(&report.items).unwrap_or_default();
        tracker.completed(
            &format!("Processed {total} items ({succeeded} succeeded)"),
            payload,
        );
        Ok(report)
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}
