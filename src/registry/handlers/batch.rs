use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::dispatcher::{normalize, run_batch, BatchSpec, BatchTarget};
use crate::error::BridgeError;
use crate::registry::validation::ParamSchema;
use crate::registry::{CommandDescriptor, CommandHandler, CommandInfo, DispatchContext, Registry};

struct BatchHandler {
    name: &'static str,
    spec: BatchSpec,
    unit_schema: ParamSchema,
}

/// Build the descriptor of a batch command.
///
/// The registry only checks the envelope (`options`); the singular/plural
/// shape is checked by normalisation and each unit by `unit_schema`, so one
/// bad unit fails alone instead of failing the call.
pub fn descriptor(info: CommandInfo, spec: BatchSpec, unit_schema: ParamSchema) -> CommandDescriptor {
    let surface_schema = surface_schema(&info, &spec, &unit_schema);
    CommandDescriptor {
        info,
        schema: ParamSchema::from_value(envelope_schema()),
        surface_schema,
        handler: Arc::new(BatchHandler {
            name: info.name,
            spec,
            unit_schema,
        }),
    }
}

#[async_trait]
impl CommandHandler for BatchHandler {
    async fn handle(
        &self,
        _registry: &Registry,
        ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let (units, options) = normalize(&self.spec, &params, ctx.settings.max_batch_units)?;
        let target = BatchTarget {
            executor: ctx.executor.as_ref(),
            max_concurrency: ctx.settings.max_concurrency.max(1),
            timeout: Some(ctx.settings.request_timeout()),
        };
        let response = run_batch(self.name, &self.spec, units, options, &self.unit_schema, target).await?;
        Ok(serde_json::to_value(response)?)
    }
}

fn options_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "skipErrors": {
                "description": "Keep going after a failed unit (default true). false stops at the first failure.",
                "type": "boolean"
            }
        }
    })
}

fn envelope_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "options": options_schema() }
    })
}

/// What tool-calling clients see: the singular key takes one unit, the
/// plural key a non-empty list, and the unit schema lives in `definitions`.
fn surface_schema(info: &CommandInfo, spec: &BatchSpec, unit_schema: &ParamSchema) -> Value {
    let mut unit = unit_schema.as_value().clone();
    let mut definitions = Map::new();
    let mut title = "Unit".to_string();
    if let Some(obj) = unit.as_object_mut() {
        if let Some(Value::Object(defs)) = obj.remove("definitions") {
            definitions = defs;
        }
        obj.remove("$schema");
        if let Some(t) = obj.get("title").and_then(Value::as_str) {
            title = t.to_string();
        }
    }
    definitions.insert(title.clone(), unit);
    let unit_ref = json!({ "$ref": format!("#/definitions/{title}") });

    let mut properties = Map::new();
    properties.insert(spec.singular.to_string(), unit_ref.clone());
    properties.insert(
        spec.plural.to_string(),
        json!({ "type": "array", "items": unit_ref, "minItems": 1 }),
    );
    properties.insert("options".to_string(), options_schema());

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": info.name,
        "description": format!(
            "Pass `{}` for one unit or `{}` for several, not both.",
            spec.singular, spec.plural
        ),
        "type": "object",
        "properties": properties,
        "definitions": definitions,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use crate::executor::fake::FakeExecutor;
    use crate::progress::NoopProgress;
    use crate::registry::{testing, DuplicatePolicy};

    fn registry() -> Registry {
        Registry::with_builtin(DuplicatePolicy::Reject).unwrap()
    }

    #[tokio::test]
    async fn rename_with_one_empty_name() {
        let exec = FakeExecutor::new().on("rename_layer", |p| Ok(json!({ "id": p["nodeId"], "name": p["name"] })));
        let ctx = testing::context(exec.clone(), Arc::new(NoopProgress));
        let out = registry()
            .dispatch(
                "rename_layers",
                json!({ "renames": [{ "nodeId": "A", "name": "x" }, { "nodeId": "B", "name": "" }] }),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(out["success"], true);
        assert_eq!(out["results"][0]["nodeId"], "A");
        assert_eq!(out["results"][0]["success"], true);
        assert_eq!(out["results"][1]["nodeId"], "B");
        assert_eq!(out["results"][1]["success"], false);
        assert!(out["results"][1]["error"].as_str().unwrap().contains("name"));
        assert_eq!(exec.call_count(), 1);
    }

    #[tokio::test]
    async fn strict_family_rejects_with_outcomes() {
        let exec = FakeExecutor::new().on("clone_node", |p| {
            if p["nodeId"] == "locked" {
                Err("Node is locked".into())
            } else {
                Ok(json!({ "id": "9:9" }))
            }
        });
        let ctx = testing::context(exec, Arc::new(NoopProgress));
        let err = registry()
            .dispatch(
                "clone_nodes",
                json!({ "clones": [{ "nodeId": "1:1" }, { "nodeId": "locked" }] }),
                &ctx,
            )
            .await
            .unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "BatchFailed");
        assert_eq!(json["detail"]["results"].as_array().unwrap().len(), 2);
        assert_eq!(json["detail"]["results"][1]["error"], "Node is locked");
    }

    #[tokio::test]
    async fn max_batch_units_is_enforced() {
        let exec = FakeExecutor::new();
        let mut ctx = testing::context(exec.clone(), Arc::new(NoopProgress));
        let mut settings = (*ctx.settings).clone();
        settings.max_batch_units = 2;
        ctx.settings = Arc::new(settings);

        let moves: Vec<Value> = (0..3).map(|i| json!({ "nodeId": format!("{i}"), "x": 0, "y": 0 })).collect();
        let err = registry()
            .dispatch("move_nodes", json!({ "moves": moves }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation(ref v) if v.field == "moves"));
        assert_eq!(exec.call_count(), 0);
    }

    #[test]
    fn surface_schema_advertises_both_keys() {
        let registry = registry();
        let schema = &registry.get("set_node_opacity").unwrap().surface_schema;
        assert_eq!(schema["properties"]["entry"]["$ref"], "#/definitions/OpacityUnit");
        assert_eq!(schema["properties"]["entries"]["type"], "array");
        assert_eq!(schema["properties"]["entries"]["minItems"], 1);
        assert!(schema["definitions"]["OpacityUnit"]["properties"]["opacity"].is_object());

        // The surface schema itself validates a well-formed plural call.
        ParamSchema::from_value(schema.clone())
            .validate(&json!({ "entries": [{ "nodeId": "1:2", "opacity": 0.3 }] }))
            .unwrap();
    }
}
