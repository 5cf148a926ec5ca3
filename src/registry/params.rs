//! Typed parameter structs. Their `schemars` schemas are what the validator
//! checks incoming params against and what the tool catalogue advertises.

use schemars::gen::SchemaGenerator;
use schemars::schema::{
    ArrayValidation, InstanceType, NumberValidation, Schema, SchemaObject, SingleOrVec,
    StringValidation,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Canvas coordinates and sizes stay within this magnitude.
pub const CANVAS_LIMIT: f64 = 100_000.0;
/// Largest export scale factor.
pub const MAX_EXPORT_SCALE: f64 = 4.0;

// ── Schema helpers (used through `schema_with`) ─────────────────

fn number_schema(nullable: bool, number: NumberValidation) -> Schema {
    let instance_type: SingleOrVec<InstanceType> = if nullable {
        vec![InstanceType::Number, InstanceType::Null].into()
    } else {
        InstanceType::Number.into()
    };
    SchemaObject {
        instance_type: Some(instance_type),
        number: Some(Box::new(number)),
        ..Default::default()
    }
    .into()
}

fn bounded(min: f64, max: f64) -> NumberValidation {
    NumberValidation {
        minimum: Some(min),
        maximum: Some(max),
        ..Default::default()
    }
}

fn positive(max: f64) -> NumberValidation {
    NumberValidation {
        exclusive_minimum: Some(0.0),
        maximum: Some(max),
        ..Default::default()
    }
}

pub(crate) fn coordinate(_: &mut SchemaGenerator) -> Schema {
    number_schema(false, bounded(-CANVAS_LIMIT, CANVAS_LIMIT))
}

pub(crate) fn optional_coordinate(_: &mut SchemaGenerator) -> Schema {
    number_schema(true, bounded(-CANVAS_LIMIT, CANVAS_LIMIT))
}

pub(crate) fn dimension(_: &mut SchemaGenerator) -> Schema {
    number_schema(false, positive(CANVAS_LIMIT))
}

pub(crate) fn optional_dimension(_: &mut SchemaGenerator) -> Schema {
    number_schema(true, positive(CANVAS_LIMIT))
}

pub(crate) fn optional_unit_interval(_: &mut SchemaGenerator) -> Schema {
    number_schema(true, bounded(0.0, 1.0))
}

pub(crate) fn optional_export_scale(_: &mut SchemaGenerator) -> Schema {
    number_schema(true, positive(MAX_EXPORT_SCALE))
}

/// Non-empty list of non-empty node ids.
pub(crate) fn node_id_list(_: &mut SchemaGenerator) -> Schema {
    let id: Schema = SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        string: Some(Box::new(StringValidation {
            min_length: Some(1),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into();
    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(id.into()),
            min_items: Some(1),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

/// Non-empty list whose items are checked one by one by the handler.
pub(crate) fn item_list(_: &mut SchemaGenerator) -> Schema {
    SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            min_items: Some(1),
            ..Default::default()
        })),
        ..Default::default()
    }
    .into()
}

// ── Shared shapes ───────────────────────────────────────────────

/// RGBA colour, every channel in [0, 1]. Alpha defaults to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rgba {
    #[schemars(range(min = 0.0, max = 1.0))]
    pub r: f64,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub g: f64,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub b: f64,
    #[serde(default)]
    #[schemars(schema_with = "optional_unit_interval")]
    pub a: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutMode {
    None,
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayoutWrap {
    NoWrap,
    Wrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Png,
    Jpg,
    Svg,
    Pdf,
}

// ── Single commands ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct HelpParams {
    /// Category name (e.g. "batch") or command name (e.g. "rename_layers").
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdParams {
    #[schemars(length(min = 1))]
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRectangleParams {
    #[schemars(schema_with = "coordinate")]
    pub x: f64,
    #[schemars(schema_with = "coordinate")]
    pub y: f64,
    #[schemars(schema_with = "dimension")]
    pub width: f64,
    #[schemars(schema_with = "dimension")]
    pub height: f64,
    #[serde(default)]
    pub name: Option<String>,
    /// Parent frame; the current page when absent.
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrameParams {
    #[schemars(schema_with = "coordinate")]
    pub x: f64,
    #[schemars(schema_with = "coordinate")]
    pub y: f64,
    #[schemars(schema_with = "dimension")]
    pub width: f64,
    #[schemars(schema_with = "dimension")]
    pub height: f64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub fill_color: Option<Rgba>,
    #[serde(default)]
    pub stroke_color: Option<Rgba>,
    #[serde(default)]
    #[schemars(schema_with = "optional_dimension")]
    pub stroke_weight: Option<f64>,
    #[serde(default)]
    pub layout_mode: Option<LayoutMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTextParams {
    #[schemars(schema_with = "coordinate")]
    pub x: f64,
    #[schemars(schema_with = "coordinate")]
    pub y: f64,
    pub text: String,
    #[serde(default)]
    #[schemars(schema_with = "optional_dimension")]
    pub font_size: Option<f64>,
    #[serde(default)]
    #[schemars(range(min = 100, max = 900))]
    pub font_weight: Option<u32>,
    #[serde(default)]
    pub font_color: Option<Rgba>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetCornerRadiusParams {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(range(min = 0.0, max = 100_000.0))]
    pub radius: f64,
    /// Which corners to round: top-left, top-right, bottom-right, bottom-left.
    #[serde(default)]
    #[schemars(length(min = 4, max = 4))]
    pub corners: Option<Vec<bool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanNodesByTypesParams {
    #[schemars(length(min = 1))]
    pub node_id: String,
    /// Node types to collect, e.g. ["FRAME", "COMPONENT"].
    #[schemars(length(min = 1))]
    pub types: Vec<String>,
}

// ── Batch units ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(schema_with = "coordinate")]
    pub x: f64,
    #[schemars(schema_with = "coordinate")]
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResizeUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(schema_with = "dimension")]
    pub width: f64,
    #[schemars(schema_with = "dimension")]
    pub height: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(length(min = 1))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FillUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    pub color: Rgba,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StrokeUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    pub color: Rgba,
    #[serde(default)]
    #[schemars(schema_with = "optional_dimension")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpacityUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub opacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FontUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "optional_dimension")]
    pub size: Option<f64>,
    #[serde(default)]
    #[schemars(range(min = 100, max = 900))]
    pub weight: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LayoutUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    pub layout_mode: LayoutMode,
    #[serde(default)]
    pub layout_wrap: Option<LayoutWrap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloneUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[serde(default)]
    #[schemars(schema_with = "optional_coordinate")]
    pub x: Option<f64>,
    #[serde(default)]
    #[schemars(schema_with = "optional_coordinate")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUnit {
    #[schemars(length(min = 1))]
    pub component_key: String,
    #[schemars(schema_with = "coordinate")]
    pub x: f64,
    #[schemars(schema_with = "coordinate")]
    pub y: f64,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportUnit {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[serde(default)]
    pub format: Option<ExportFormat>,
    #[serde(default)]
    #[schemars(schema_with = "optional_export_scale")]
    pub scale: Option<f64>,
}

// ── Caller-side chunked commands ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TextReplacement {
    #[schemars(length(min = 1))]
    pub node_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetMultipleTextContentsParams {
    /// Container the text nodes live under; reported back, not used for lookup.
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(length(min = 1))]
    pub text: Vec<TextReplacement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMultipleNodesParams {
    #[schemars(schema_with = "node_id_list")]
    pub node_ids: Vec<String>,
}

/// What the registry checks for `set_multiple_text_contents`. Each
/// replacement is checked against [`TextReplacement`] on its own, so one bad
/// entry fails alone.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SetMultipleTextContentsEnvelope {
    #[schemars(length(min = 1))]
    pub node_id: String,
    #[schemars(schema_with = "item_list")]
    pub text: Vec<serde_json::Value>,
}

/// What the registry checks for `delete_multiple_nodes`; ids are checked one
/// by one.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMultipleNodesEnvelope {
    #[schemars(schema_with = "item_list")]
    pub node_ids: Vec<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::registry::validation::ParamSchema;
    use serde_json::json;

    #[test]
    fn coordinates_are_bounded() {
        let schema = ParamSchema::of::<MoveUnit>();
        schema
            .validate(&json!({ "nodeId": "1:2", "x": -100000, "y": 100000 }))
            .unwrap();
        let err = schema
            .validate(&json!({ "nodeId": "1:2", "x": -100001, "y": 0 }))
            .unwrap_err();
        assert_eq!(err.field, "x");
    }

    #[test]
    fn colour_channels_in_unit_interval() {
        let schema = ParamSchema::of::<FillUnit>();
        schema
            .validate(&json!({ "nodeId": "1:2", "color": { "r": 1, "g": 0, "b": 0.5 } }))
            .unwrap();
        let err = schema
            .validate(&json!({ "nodeId": "1:2", "color": { "r": 1, "g": 0, "b": 0, "a": 2 } }))
            .unwrap_err();
        assert_eq!(err.field, "color.a");
    }

    #[test]
    fn export_scale_excludes_zero() {
        let schema = ParamSchema::of::<ExportUnit>();
        schema.validate(&json!({ "nodeId": "1:2", "scale": 4 })).unwrap();
        schema.validate(&json!({ "nodeId": "1:2", "format": "SVG" })).unwrap();
        assert_eq!(
            schema.validate(&json!({ "nodeId": "1:2", "scale": 0 })).unwrap_err().field,
            "scale"
        );
        assert_eq!(
            schema.validate(&json!({ "nodeId": "1:2", "scale": 4.5 })).unwrap_err().field,
            "scale"
        );
        assert_eq!(
            schema.validate(&json!({ "nodeId": "1:2", "format": "GIF" })).unwrap_err().field,
            "format"
        );
    }

    #[test]
    fn rename_requires_non_empty_name() {
        let schema = ParamSchema::of::<RenameUnit>();
        let err = schema.validate(&json!({ "nodeId": "1:2", "name": "" })).unwrap_err();
        assert_eq!(err.field, "name");
        assert_eq!(err.message, "must not be empty");
    }

    #[test]
    fn delete_needs_at_least_one_id() {
        let schema = ParamSchema::of::<DeleteMultipleNodesParams>();
        schema.validate(&json!({ "nodeIds": ["1:2"] })).unwrap();
        assert_eq!(
            schema.validate(&json!({ "nodeIds": [] })).unwrap_err().field,
            "nodeIds"
        );
        assert_eq!(
            schema.validate(&json!({ "nodeIds": ["1:2", ""] })).unwrap_err().field,
            "nodeIds[1]"
        );
    }

    #[test]
    fn envelopes_leave_items_to_the_handler() {
        let schema = ParamSchema::of::<SetMultipleTextContentsEnvelope>();
        schema
            .validate(&json!({ "nodeId": "0:1", "text": [{ "nodeId": "", "text": "x" }, 7] }))
            .unwrap();
        assert_eq!(
            schema.validate(&json!({ "nodeId": "0:1", "text": [] })).unwrap_err().field,
            "text"
        );
        let schema = ParamSchema::of::<DeleteMultipleNodesEnvelope>();
        schema.validate(&json!({ "nodeIds": ["1:2", ""] })).unwrap();
        assert_eq!(schema.validate(&json!({ "nodeIds": [] })).unwrap_err().field, "nodeIds");
    }

    #[test]
    fn optional_fields_are_not_required() {
        ParamSchema::of::<CloneUnit>()
            .validate(&json!({ "nodeId": "1:2" }))
            .unwrap();
        ParamSchema::of::<HelpParams>().validate(&json!({})).unwrap();
    }
}
