//! Caller-side chunked commands: one remote call per item, paced in chunks,
//! with `command_progress` events published as the run advances.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::chunked::{ChunkedReport, ChunkedRunner};
use crate::correlation::random_id;
use crate::dispatcher::{unit_error_message, UnitOutcome};
use crate::error::{BridgeError, ValidationError};
use crate::progress::ProgressTracker;
use crate::registry::params::{DeleteMultipleNodesEnvelope, SetMultipleTextContentsEnvelope, TextReplacement};
use crate::registry::validation::{index_path, nest_error, ParamSchema};
use crate::registry::{CommandHandler, DispatchContext, Registry};

pub struct SetMultipleTextContents;
pub struct DeleteMultipleNodes;

/// One entry of a chunked call: the node id it is keyed by, and either the
/// params to send or why the entry was rejected.
type Item = (Option<String>, Result<Value, String>);

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, BridgeError> {
    serde_json::from_value(params).map_err(|e| ValidationError::new("", e.to_string()).into())
}

fn check_len(field: &str, len: usize, ctx: &DispatchContext) -> Result<(), BridgeError> {
    let max = ctx.settings.max_batch_units;
    if len > max {
        return Err(ValidationError::new(field, format!("must have at most {max} items (got {len})")).into());
    }
    Ok(())
}

/// Check every entry of `field` against `schema`. Rejected entries keep their
/// position and carry the nested error (`text[1].nodeId: must not be empty`).
fn check_items(
    field: &str,
    entries: Vec<Value>,
    schema: &ParamSchema,
    to_unit: impl Fn(Value) -> Value,
    key_of: impl Fn(&Value) -> Option<String>,
) -> Vec<Item> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let key = key_of(&entry);
            let unit = match schema.validate(&entry) {
                Ok(()) => Ok(to_unit(entry)),
                Err(e) => Err(nest_error(&index_path(field, i), e).to_string()),
            };
            (key, unit)
        })
        .collect()
}

/// Run `remote` once per valid item; rejected items fail in place without a
/// request. Returns the run report and the per-item outcomes keyed back to
/// their node ids.
async fn run_per_item(
    ctx: &DispatchContext,
    command: &str,
    remote: &'static str,
    items: Vec<Item>,
) -> Result<(ChunkedReport<Value>, Vec<UnitOutcome>), BridgeError> {
    let keys: Vec<Option<String>> = items.iter().map(|(k, _)| k.clone()).collect();
    let mut tracker = ProgressTracker::new(&random_id(), command, ctx.progress.clone());
    let runner = ChunkedRunner::new(ctx.settings.mutation_plan());
    let executor = &ctx.executor;
    let timeout = Some(ctx.settings.request_timeout());

    let report = runner
        .run(
            &mut tracker,
            async { Ok(items) },
            move |(_, unit)| async move {
                let params = unit?;
                executor
                    .execute(remote, params, timeout)
                    .await
                    .map_err(unit_error_message)
            },
        )
        .await?;

    let outcomes = report
        .items
        .iter()
        .map(|item| UnitOutcome {
            index: item.index,
            node_id: keys.get(item.index).cloned().flatten(),
            success: item.success,
            result: item.result.clone(),
            error: item.error.clone(),
        })
        .collect();
    Ok((report, outcomes))
}

#[async_trait]
impl CommandHandler for SetMultipleTextContents {
    async fn handle(
        &self,
        _registry: &Registry,
        ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let p: SetMultipleTextContentsEnvelope = parse(params)?;
        check_len("text", p.text.len(), ctx)?;

        let schema = ParamSchema::of::<TextReplacement>();
        let items = check_items(
            "text",
            p.text,
            &schema,
            |entry| json!({ "nodeId": entry["nodeId"], "text": entry["text"] }),
            |entry| entry.get("nodeId").and_then(Value::as_str).map(str::to_string),
        );
        let (report, results) =
            run_per_item(ctx, "set_multiple_text_contents", "set_text_content", items).await?;

        Ok(json!({
            "success": report.succeeded > 0,
            "nodeId": p.node_id,
            "replacementsApplied": report.succeeded,
            "replacementsFailed": report.failed,
            "totalReplacements": report.total_items,
            "chunks": report.chunks,
            "results": results,
        }))
    }
}

#[async_trait]
impl CommandHandler for DeleteMultipleNodes {
    async fn handle(
        &self,
        _registry: &Registry,
        ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let p: DeleteMultipleNodesEnvelope = parse(params)?;
        check_len("nodeIds", p.node_ids.len(), ctx)?;

        let schema = ParamSchema::from_value(json!({ "type": "string", "minLength": 1 }));
        let items = check_items(
            "nodeIds",
            p.node_ids,
            &schema,
            |id| json!({ "nodeId": id }),
            |id| id.as_str().map(str::to_string),
        );
        let (report, results) =
            run_per_item(ctx, "delete_multiple_nodes", "delete_node", items).await?;

        Ok(json!({
            "success": report.succeeded > 0,
            "nodesDeleted": report.succeeded,
            "nodesFailed": report.failed,
            "totalNodes": report.total_items,
            "chunks": report.chunks,
            "results": results,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::executor::fake::FakeExecutor;
    use crate::progress::collect::CollectingProgress;
    use crate::protocol::ProgressStatus;
    use crate::registry::{testing, DuplicatePolicy};

    #[tokio::test]
    async fn text_replacements_run_in_chunks() {
        let exec = FakeExecutor::new().on("set_text_content", |p| {
            if p["nodeId"] == "missing" {
                Err("Node not found".into())
            } else {
                Ok(json!({ "id": p["nodeId"], "characters": p["text"] }))
            }
        });
        let sink = CollectingProgress::new();
        let ctx = testing::context(exec.clone(), sink.clone());
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();

        let mut text: Vec<Value> = (0..11)
            .map(|i| json!({ "nodeId": format!("t{i}"), "text": format!("line {i}") }))
            .collect();
        text[4] = json!({ "nodeId": "missing", "text": "x" });

        let out = registry
            .dispatch(
                "set_multiple_text_contents",
                json!({ "nodeId": "0:1", "text": text }),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(out["replacementsApplied"], 10);
        assert_eq!(out["replacementsFailed"], 1);
        assert_eq!(out["chunks"], 3);
        assert_eq!(out["results"][4]["nodeId"], "missing");
        assert_eq!(out["results"][4]["error"], "Node not found");
        assert_eq!(exec.call_count(), 11);

        let events = sink.snapshot();
        assert_eq!(events.first().unwrap().status, ProgressStatus::Started);
        assert_eq!(events.last().unwrap().status, ProgressStatus::Completed);
        assert_eq!(
            events.iter().filter(|e| e.status == ProgressStatus::InProgress).count(),
            3
        );
        assert!(events.iter().all(|e| e.command_type == "set_multiple_text_contents"));
    }

    #[tokio::test]
    async fn delete_reports_per_node() {
        let exec = FakeExecutor::new().on("delete_node", |p| Ok(json!({ "id": p["nodeId"] })));
        let ctx = testing::context(exec.clone(), Arc::new(crate::progress::NoopProgress));
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();

        let out = registry
            .dispatch("delete_multiple_nodes", json!({ "nodeIds": ["1:1", "1:2"] }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["nodesDeleted"], 2);
        assert_eq!(out["results"][1]["nodeId"], "1:2");

        let err = registry
            .dispatch("delete_multiple_nodes", json!({ "nodeIds": [] }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(ref v) if v.field == "nodeIds"));
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn one_bad_replacement_fails_alone() {
        let exec = FakeExecutor::new().on("set_text_content", |p| Ok(json!({ "id": p["nodeId"] })));
        let ctx = testing::context(exec.clone(), Arc::new(crate::progress::NoopProgress));
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();

        let out = registry
            .dispatch(
                "set_multiple_text_contents",
                json!({
                    "nodeId": "0:1",
                    "text": [
                        { "nodeId": "A", "text": "a" },
                        { "nodeId": "", "text": "b" },
                        { "nodeId": "C", "text": "c" }
                    ]
                }),
                &ctx,
            )
            .await
            .unwrap();

        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["success"], true);
        assert_eq!(results[1]["success"], false);
        assert_eq!(results[1]["error"], "text[1].nodeId: must not be empty");
        assert_eq!(results[2]["success"], true);
        assert_eq!(out["replacementsApplied"], 2);
        assert_eq!(out["replacementsFailed"], 1);
        assert_eq!(exec.call_count(), 2);
        assert!(exec.calls.lock().iter().all(|(_, p)| p["nodeId"] != ""));
    }

    #[tokio::test]
    async fn one_empty_id_fails_alone_in_delete() {
        let exec = FakeExecutor::new().on("delete_node", |p| Ok(json!({ "id": p["nodeId"] })));
        let ctx = testing::context(exec.clone(), Arc::new(crate::progress::NoopProgress));
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();

        let out = registry
            .dispatch("delete_multiple_nodes", json!({ "nodeIds": ["1:1", "", 5] }), &ctx)
            .await
            .unwrap();
        assert_eq!(out["nodesDeleted"], 1);
        assert_eq!(out["nodesFailed"], 2);
        assert_eq!(out["results"][1]["error"], "nodeIds[1]: must not be empty");
        assert_eq!(out["results"][2]["success"], false);
        assert_eq!(exec.call_count(), 1);
    }

    #[test]
    fn advertised_schema_keeps_the_item_shape() {
        let registry = Registry::with_builtin(DuplicatePolicy::Reject).unwrap();
        let surface = &registry.get("set_multiple_text_contents").unwrap().surface_schema;
        assert_eq!(surface["properties"]["text"]["items"]["$ref"], "#/definitions/TextReplacement");
    }
}
