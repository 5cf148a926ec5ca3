//! Parameter validation against the JSON Schemas generated for each command.
//!
//! Schemas are compiled once with `jsonschema`. Errors name the offending
//! field by path (`renames[1].name`) so callers can fix one field without
//! guessing.

use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use jsonschema::Validator;
use schemars::JsonSchema;
use serde_json::Value;

use crate::error::ValidationError;

/// A command's parameter schema, with the `definitions` it refers to.
///
/// A schema that does not compile rejects every value; registering it fails
/// (see [`ParamSchema::compile_error`]).
#[derive(Clone)]
pub struct ParamSchema {
    root: Value,
    compiled: Result<Arc<Validator>, String>,
}

impl std::fmt::Debug for ParamSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamSchema")
            .field("root", &self.root)
            .field("compiled", &self.compiled.is_ok())
            .finish()
    }
}

impl ParamSchema {
    pub fn of<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        match serde_json::to_value(root) {
            Ok(root) => Self::from_value(root),
            Err(e) => Self {
                root: Value::Null,
                compiled: Err(e.to_string()),
            },
        }
    }

    pub fn from_value(root: Value) -> Self {
        let compiled = jsonschema::draft7::new(&root)
            .map(Arc::new)
            .map_err(|e| e.to_string());
        Self { root, compiled }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Why the schema failed to compile, if it did.
    pub fn compile_error(&self) -> Option<&str> {
        self.compiled.as_ref().err().map(String::as_str)
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        let validator = match &self.compiled {
            Ok(validator) => validator,
            Err(message) => {
                return Err(ValidationError::new("", format!("schema does not compile: {message}")));
            }
        };
        validator.validate(value).map_err(|error| {
            let path = pointer_to_path(&error.instance_path().to_string());
            match error.kind() {
                ValidationErrorKind::Required { property, .. } => {
                    let key = property.as_str().map_or_else(|| property.to_string(), str::to_string);
                    ValidationError::new(child_path(&path, &key), "is required")
                }
                ValidationErrorKind::MinLength { limit, .. } | ValidationErrorKind::MinItems { limit, .. }
                    if *limit == 1 =>
                {
                    ValidationError::new(path, "must not be empty")
                }
                _ => ValidationError::new(path, error.to_string()),
            }
        })
    }
}

/// `/renames/1/name` becomes `renames[1].name`; the root pointer becomes "".
fn pointer_to_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        match segment.parse::<usize>() {
            Ok(index) => path = index_path(&path, index),
            Err(_) => path = child_path(&path, &segment),
        }
    }
    path
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

pub(crate) fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

/// Re-root a unit-level error under its position in a batch (`renames[1]`).
pub(crate) fn nest_error(prefix: &str, error: ValidationError) -> ValidationError {
    let field = if error.field == "params" {
        prefix.to_string()
    } else if error.field.starts_with('[') {
        format!("{prefix}{}", error.field)
    } else {
        format!("{prefix}.{}", error.field)
    };
    ValidationError::new(field, error.message)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[allow(dead_code)]
    struct Color {
        #[schemars(range(min = 0.0, max = 1.0))]
        r: f64,
        #[schemars(range(min = 0.0, max = 1.0))]
        g: f64,
        #[schemars(range(min = 0.0, max = 1.0))]
        b: f64,
    }

    #[derive(Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[allow(dead_code)]
    enum Mode {
        Horizontal,
        Vertical,
    }

    #[derive(Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    #[allow(dead_code)]
    struct Sample {
        #[schemars(length(min = 1))]
        node_id: String,
        #[schemars(schema_with = "crate::registry::params::coordinate")]
        x: f64,
        count: u32,
        color: Color,
        tint: Option<Color>,
        mode: Mode,
        #[schemars(length(min = 1))]
        tags: Vec<String>,
    }

    fn schema() -> ParamSchema {
        ParamSchema::of::<Sample>()
    }

    fn valid() -> Value {
        json!({
            "nodeId": "1:2",
            "x": 10.5,
            "count": 3,
            "color": { "r": 0.1, "g": 0.2, "b": 0.3 },
            "mode": "horizontal",
            "tags": ["a"]
        })
    }

    fn field_of(v: Value) -> String {
        schema().validate(&v).unwrap_err().field
    }

    #[test]
    fn accepts_valid_params() {
        schema().validate(&valid()).unwrap();
        let mut v = valid();
        v["tint"] = json!({ "r": 1.0, "g": 0.0, "b": 0.0 });
        v["mode"] = json!("vertical");
        schema().validate(&v).unwrap();
        v["tint"] = Value::Null;
        schema().validate(&v).unwrap();
    }

    #[test]
    fn missing_required_field() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("nodeId");
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "nodeId");
        assert_eq!(err.message, "is required");
    }

    #[test]
    fn wrong_primitive_type() {
        let mut v = valid();
        v["count"] = json!("three");
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "count");
        assert!(err.message.contains("integer"), "{}", err.message);

        v["count"] = json!(1.5);
        assert_eq!(field_of(v), "count");
    }

    #[test]
    fn out_of_range_numbers_name_nested_path() {
        let mut v = valid();
        v["x"] = json!(200_000);
        assert_eq!(field_of(v.clone()), "x");

        v["x"] = json!(0);
        v["color"]["g"] = json!(1.5);
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "color.g");
        assert!(err.message.contains("maximum"), "{}", err.message);

        // A nullable reference fails as a whole.
        v["color"]["g"] = json!(0.5);
        v["tint"] = json!({ "r": -0.1, "g": 0.0, "b": 0.0 });
        assert_eq!(field_of(v), "tint");
    }

    #[test]
    fn empty_strings_and_lists() {
        let mut v = valid();
        v["nodeId"] = json!("");
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "nodeId");
        assert_eq!(err.message, "must not be empty");

        let mut v = valid();
        v["tags"] = json!([]);
        assert_eq!(field_of(v), "tags");

        let mut v = valid();
        v["tags"] = json!(["ok", 7]);
        assert_eq!(field_of(v), "tags[1]");
    }

    #[test]
    fn enum_values_are_checked() {
        let mut v = valid();
        v["mode"] = json!("diagonal");
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "mode");
        assert!(err.message.contains("horizontal"), "{}", err.message);
    }

    #[test]
    fn nested_required_field_is_named_by_path() {
        let mut v = valid();
        v["color"].as_object_mut().unwrap().remove("b");
        let err = schema().validate(&v).unwrap_err();
        assert_eq!(err.field, "color.b");
        assert_eq!(err.message, "is required");
    }

    #[test]
    fn pointers_become_field_paths() {
        assert_eq!(pointer_to_path(""), "");
        assert_eq!(pointer_to_path("/renames/1/name"), "renames[1].name");
        assert_eq!(pointer_to_path("/a~1b/0"), "a/b[0]");
    }

    #[test]
    fn keywords_outside_the_usual_subset_are_enforced() {
        let schema = ParamSchema::from_value(json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "pattern": "^[0-9]+:[0-9]+$" },
                "extra": { "not": { "type": "null" } }
            },
            "dependencies": { "extra": ["id"] }
        }));
        schema.validate(&json!({ "id": "1:2" })).unwrap();
        assert_eq!(schema.validate(&json!({ "id": "abc" })).unwrap_err().field, "id");
        assert_eq!(schema.validate(&json!({ "id": "1:2", "extra": null })).unwrap_err().field, "extra");
        assert!(schema.validate(&json!({ "extra": 1 })).is_err());
    }

    #[test]
    fn broken_schema_rejects_everything() {
        let schema = ParamSchema::from_value(json!({ "type": 12 }));
        assert!(schema.compile_error().is_some());
        let err = schema.validate(&json!({})).unwrap_err();
        assert_eq!(err.field, "params");
        assert!(schema.validate(&json!({ "anything": true })).is_err());
    }

    #[test]
    fn generated_schemas_compile() {
        assert!(schema().compile_error().is_none());
        assert!(ParamSchema::from_value(json!({ "type": "object" })).compile_error().is_none());
    }

    #[test]
    fn root_must_be_an_object() {
        let err = schema().validate(&json!([1])).unwrap_err();
        assert_eq!(err.field, "params");
    }

    #[test]
    fn nest_error_prefixes_paths() {
        let nested = nest_error("renames[1]", ValidationError::new("name", "must not be empty"));
        assert_eq!(nested.field, "renames[1].name");
        let nested = nest_error("renames[0]", ValidationError::new("", "expected object, got string"));
        assert_eq!(nested.field, "renames[0]");
    }
}
