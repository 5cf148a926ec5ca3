//! Unified single-or-batch invocation.
//!
//! Every batch command accepts either its singular key (`rename`) or its
//! plural key (`renames`). Both shapes run through the same path: normalise
//! to a unit list, validate each unit, send one remote command per unit, and
//! aggregate one outcome per unit in input order.

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{BridgeError, ValidationError};
use crate::executor::Executor;
use crate::registry::validation::{index_path, nest_error, ParamSchema};

const NOT_ATTEMPTED: &str = "not attempted: an earlier unit failed and skipErrors is false";

/// How the overall `success` flag and rejection are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Success if at least one unit succeeded. Never rejects on unit failure.
    AnySuccess,
    /// Success only if every unit succeeded; otherwise rejects with every outcome.
    AllSucceed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Sequential,
    /// Units run concurrently, bounded by `max_concurrency`. Reserved for
    /// independent reads and exports.
    Concurrent,
}

/// Shape of one batch command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSpec {
    /// Remote command sent once per unit.
    pub remote: &'static str,
    pub singular: &'static str,
    pub plural: &'static str,
    /// Unit field echoed back in each outcome (usually `nodeId`).
    pub key_field: &'static str,
    pub policy: BatchPolicy,
    pub mode: DispatchMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub skip_errors: bool,
    /// The call used the singular key; unit errors are reported under it.
    pub singular: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            skip_errors: true,
            singular: false,
        }
    }
}

/// Result of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitOutcome {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UnitOutcome {
    fn failed(index: usize, node_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            node_id,
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub policy: BatchPolicy,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<UnitOutcome>,
}

/// A remote handler's own message for execution failures, the full error otherwise.
pub(crate) fn unit_error_message(error: BridgeError) -> String {
    match error {
        BridgeError::Execution { message, .. } => message,
        other => other.to_string(),
    }
}

/// Turn `{singular: x}` or `{plural: [..]}` into a unit list.
pub fn normalize(
    spec: &BatchSpec,
    params: &Value,
    max_units: usize,
) -> Result<(Vec<Value>, BatchOptions), ValidationError> {
    let Some(obj) = params.as_object() else {
        return Err(ValidationError::new("", "expected an object"));
    };

    let mut options = match obj.get("options") {
        None | Some(Value::Null) => BatchOptions::default(),
        Some(Value::Object(o)) => match o.get("skipErrors") {
            None | Some(Value::Null) => BatchOptions::default(),
            Some(Value::Bool(skip_errors)) => BatchOptions {
                skip_errors: *skip_errors,
                ..BatchOptions::default()
            },
            Some(_) => return Err(ValidationError::new("options.skipErrors", "expected boolean")),
        },
        Some(_) => return Err(ValidationError::new("options", "expected object")),
    };

    let singular = obj.get(spec.singular).filter(|v| !v.is_null());
    let plural = obj.get(spec.plural).filter(|v| !v.is_null());
    let units = match (singular, plural) {
        (Some(_), Some(_)) => {
            return Err(ValidationError::new(
                "",
                format!("pass either `{}` or `{}`, not both", spec.singular, spec.plural),
            ));
        }
        (None, None) => {
            return Err(ValidationError::new(
                "",
                format!("one of `{}` or `{}` is required", spec.singular, spec.plural),
            ));
        }
        (Some(unit), None) => {
            options.singular = true;
            vec![unit.clone()]
        }
        (None, Some(Value::Array(units))) => units.clone(),
        (None, Some(_)) => return Err(ValidationError::new(spec.plural, "expected array")),
    };

    if units.is_empty() {
        return Err(ValidationError::new(spec.plural, "must not be empty"));
    }
    if units.len() > max_units {
        return Err(ValidationError::new(
            spec.plural,
            format!("must have at most {max_units} items (got {})", units.len()),
        ));
    }
    Ok((units, options))
}

/// Where and how units are sent.
#[derive(Clone, Copy)]
pub struct BatchTarget<'a> {
    pub executor: &'a dyn Executor,
    pub max_concurrency: usize,
    /// Per-unit timeout; `None` uses the executor's default.
    pub timeout: Option<Duration>,
}

/// Execute every unit and aggregate per the family's policy.
pub async fn run_batch(
    command: &str,
    spec: &BatchSpec,
    units: Vec<Value>,
    options: BatchOptions,
    unit_schema: &ParamSchema,
    target: BatchTarget<'_>,
) -> Result<BatchResponse, BridgeError> {
    let total = units.len();
    let fail_fast = !options.skip_errors;
    let concurrent =
        spec.mode == DispatchMode::Concurrent && !fail_fast && target.max_concurrency > 1;
    debug!(command, total, concurrent, fail_fast, "dispatching batch");

    let BatchTarget {
        executor,
        max_concurrency,
        timeout,
    } = target;
    let run_unit = move |index: usize, unit: Value| async move {
        let node_id = unit
            .get(spec.key_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Err(e) = unit_schema.validate(&unit) {
            let at = if options.singular {
                spec.singular.to_string()
            } else {
                index_path(spec.plural, index)
            };
            let nested = nest_error(&at, e);
            return UnitOutcome::failed(index, node_id, nested.to_string());
        }
        match executor.execute(spec.remote, unit, timeout).await {
            Ok(result) => UnitOutcome {
                index,
                node_id,
                success: true,
                result: Some(result),
                error: None,
            },
            Err(e) => UnitOutcome::failed(index, node_id, unit_error_message(e)),
        }
    };

    let mut results = Vec::with_capacity(total);
    let mut stopped_at = None;
    if concurrent {
        results = stream::iter(units.into_iter().enumerate())
            .map(|(index, unit)| run_unit(index, unit))
            .buffered(max_concurrency)
            .collect()
            .await;
    } else {
        let mut pending = units.into_iter().enumerate();
        for (index, unit) in pending.by_ref() {
            let outcome = run_unit(index, unit).await;
            let failed = !outcome.success;
            results.push(outcome);
            if failed && fail_fast {
                stopped_at = Some(index);
                break;
            }
        }
        for (index, unit) in pending {
            let node_id = unit
                .get(spec.key_field)
                .and_then(Value::as_str)
                .map(str::to_string);
            results.push(UnitOutcome::failed(index, node_id, NOT_ATTEMPTED));
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = total - succeeded;

    if let Some(index) = stopped_at {
        let reason = results
            .get(index)
            .and_then(|r| r.error.clone())
            .unwrap_or_default();
        return Err(BridgeError::BatchFailed {
            command: command.to_string(),
            message: format!("stopped at unit {index} of {total}: {reason}"),
            results,
        });
    }
    if spec.policy == BatchPolicy::AllSucceed && failed > 0 {
        return Err(BridgeError::BatchFailed {
            command: command.to_string(),
            message: format!("{failed} of {total} units failed"),
            results,
        });
    }

    Ok(BatchResponse {
        success: match spec.policy {
            BatchPolicy::AnySuccess => succeeded > 0,
            BatchPolicy::AllSucceed => failed == 0,
        },
        policy: spec.policy,
        total,
        succeeded,
        failed,
        results,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use crate::executor::fake::FakeExecutor;
    use crate::registry::params::{OpacityUnit, RenameUnit};
    use serde_json::json;

    const RENAME: BatchSpec = BatchSpec {
        remote: "rename_layer",
        singular: "rename",
        plural: "renames",
        key_field: "nodeId",
        policy: BatchPolicy::AnySuccess,
        mode: DispatchMode::Sequential,
    };

    const OPACITY: BatchSpec = BatchSpec {
        remote: "set_opacity",
        singular: "entry",
        plural: "entries",
        key_field: "nodeId",
        policy: BatchPolicy::AnySuccess,
        mode: DispatchMode::Sequential,
    };

    async fn run(
        spec: &BatchSpec,
        schema: &ParamSchema,
        params: Value,
        exec: &FakeExecutor,
    ) -> Result<BatchResponse, BridgeError> {
        let (units, options) = normalize(spec, &params, 200)?;
        let target = BatchTarget {
            executor: exec,
            max_concurrency: 4,
            timeout: None,
        };
        run_batch("test", spec, units, options, schema, target).await
    }

    #[tokio::test]
    async fn singular_and_plural_are_equivalent() {
        let schema = ParamSchema::of::<OpacityUnit>();
        let unit = json!({ "nodeId": "1:2", "opacity": 0.5 });

        let exec = FakeExecutor::new();
        let one = run(&OPACITY, &schema, json!({ "entry": unit }), &exec).await.unwrap();
        let many = run(&OPACITY, &schema, json!({ "entries": [unit] }), &exec).await.unwrap();
        assert_eq!(one, many);
        assert_eq!(one.total, 1);
        assert_eq!(one.results[0].node_id.as_deref(), Some("1:2"));
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn malformed_unit_fails_alone() {
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new();
        let resp = run(
            &RENAME,
            &schema,
            json!({ "renames": [
                { "nodeId": "A", "name": "x" },
                { "nodeId": "B", "name": "" },
                { "nodeId": "C", "name": "z" }
            ]}),
            &exec,
        )
        .await
        .unwrap();

        assert!(resp.success);
        assert_eq!(resp.total, 3);
        assert_eq!(resp.succeeded, 2);
        let flags: Vec<bool> = resp.results.iter().map(|r| r.success).collect();
        assert_eq!(flags, vec![true, false, true]);
        let err = resp.results[1].error.as_deref().unwrap();
        assert!(err.contains("renames[1].name"), "{err}");
        assert_eq!(resp.results[1].node_id.as_deref(), Some("B"));
        // The malformed unit never reached the executor.
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn singular_unit_error_names_the_singular_key() {
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new();
        let resp = run(&RENAME, &schema, json!({ "rename": { "nodeId": "B", "name": "" } }), &exec)
            .await
            .unwrap();

        assert!(!resp.success);
        assert_eq!(
            resp.results[0].error.as_deref(),
            Some("rename.name: must not be empty")
        );
        assert_eq!(exec.call_count(), 0);

        let (_, options) = normalize(&RENAME, &json!({ "rename": {} }), 200).unwrap();
        assert!(options.singular);
        let (_, options) = normalize(&RENAME, &json!({ "renames": [{}] }), 200).unwrap();
        assert!(!options.singular);
    }

    #[tokio::test]
    async fn remote_failure_is_isolated() {
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new().on("rename_layer", |p| {
            if p["nodeId"] == "gone" {
                Err("Node not found".into())
            } else {
                Ok(json!({ "name": p["name"] }))
            }
        });
        let resp = run(
            &RENAME,
            &schema,
            json!({ "renames": [{ "nodeId": "gone", "name": "a" }, { "nodeId": "B", "name": "b" }] }),
            &exec,
        )
        .await
        .unwrap();
        assert_eq!(resp.results[0].error.as_deref(), Some("Node not found"));
        assert_eq!(resp.results[1].result, Some(json!({ "name": "b" })));
        assert!(resp.success);
    }

    #[tokio::test]
    async fn all_failed_any_success_is_unsuccessful_but_resolves() {
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new().on("rename_layer", |_| Err("locked".into()));
        let resp = run(&RENAME, &schema, json!({ "rename": { "nodeId": "A", "name": "a" } }), &exec)
            .await
            .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.failed, 1);
    }

    #[tokio::test]
    async fn all_succeed_policy_rejects_with_every_outcome() {
        let spec = BatchSpec {
            policy: BatchPolicy::AllSucceed,
            ..RENAME
        };
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new().on("rename_layer", |p| {
            if p["nodeId"] == "B" {
                Err("locked".into())
            } else {
                Ok(Value::Null)
            }
        });
        let err = run(
            &spec,
            &schema,
            json!({ "renames": [
                { "nodeId": "A", "name": "a" },
                { "nodeId": "B", "name": "b" },
                { "nodeId": "C", "name": "c" }
            ]}),
            &exec,
        )
        .await
        .unwrap_err();

        let BridgeError::BatchFailed { results, message, .. } = err else {
            panic!("expected BatchFailed");
        };
        assert_eq!(results.len(), 3);
        assert!(results[0].success && !results[1].success && results[2].success);
        assert_eq!(message, "1 of 3 units failed");
        assert_eq!(exec.call_count(), 3);
    }

    #[tokio::test]
    async fn fail_fast_stops_and_marks_rest_not_attempted() {
        let spec = BatchSpec {
            mode: DispatchMode::Concurrent,
            ..RENAME
        };
        let schema = ParamSchema::of::<RenameUnit>();
        let exec = FakeExecutor::new().on("rename_layer", |p| {
            if p["nodeId"] == "B" {
                Err("locked".into())
            } else {
                Ok(Value::Null)
            }
        });
        let err = run(
            &spec,
            &schema,
            json!({
                "renames": [
                    { "nodeId": "A", "name": "a" },
                    { "nodeId": "B", "name": "b" },
                    { "nodeId": "C", "name": "c" }
                ],
                "options": { "skipErrors": false }
            }),
            &exec,
        )
        .await
        .unwrap_err();

        let BridgeError::BatchFailed { results, .. } = err else {
            panic!("expected BatchFailed");
        };
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some("locked"));
        assert!(results[2].error.as_deref().unwrap().starts_with("not attempted"));
        assert_eq!(results[2].node_id.as_deref(), Some("C"));
        assert_eq!(exec.call_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_mode_keeps_input_order() {
        let spec = BatchSpec {
            remote: "get_node_info",
            singular: "node",
            plural: "nodes",
            key_field: "nodeId",
            policy: BatchPolicy::AnySuccess,
            mode: DispatchMode::Concurrent,
        };
        let schema = ParamSchema::of::<crate::registry::params::NodeIdParams>();
        let exec = FakeExecutor::new();
        let nodes: Vec<Value> = (0..12).map(|i| json!({ "nodeId": format!("n{i}") })).collect();
        let (units, options) = normalize(&spec, &json!({ "nodes": nodes }), 200).unwrap();
        let target = BatchTarget {
            executor: exec.as_ref(),
            max_concurrency: 3,
            timeout: None,
        };
        let resp = run_batch("get_nodes_info", &spec, units, options, &schema, target)
            .await
            .unwrap();

        let ids: Vec<String> = resp.results.iter().map(|r| r.node_id.clone().unwrap()).collect();
        let expected: Vec<String> = (0..12).map(|i| format!("n{i}")).collect();
        assert_eq!(ids, expected);
        assert!(resp.results.iter().enumerate().all(|(i, r)| r.index == i));
    }

    #[test]
    fn normalize_rejects_bad_shapes() {
        let both = normalize(&RENAME, &json!({ "rename": {}, "renames": [] }), 200).unwrap_err();
        assert!(both.message.contains("not both"));

        let neither = normalize(&RENAME, &json!({}), 200).unwrap_err();
        assert_eq!(neither.field, "params");

        let empty = normalize(&RENAME, &json!({ "renames": [] }), 200).unwrap_err();
        assert_eq!(empty.field, "renames");

        let not_list = normalize(&RENAME, &json!({ "renames": { "nodeId": "A" } }), 200).unwrap_err();
        assert_eq!(not_list.field, "renames");

        let units: Vec<Value> = (0..3).map(|_| json!({})).collect();
        let too_many = normalize(&RENAME, &json!({ "renames": units }), 2).unwrap_err();
        assert!(too_many.message.contains("at most 2"));

        let bad_opt = normalize(&RENAME, &json!({ "rename": {}, "options": { "skipErrors": "no" } }), 200)
            .unwrap_err();
        assert_eq!(bad_opt.field, "options.skipErrors");
    }
}
