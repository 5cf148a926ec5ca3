pub mod catalog;
pub mod handlers;
pub mod params;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::{BatchPolicy, BatchSpec, DispatchMode};
use crate::error::BridgeError;
use crate::executor::Executor;
use crate::progress::ProgressSink;
use crate::settings::BridgeSettings;

use handlers::{batch, chunked, forward, local};
use params::{
    CloneUnit, CreateFrameParams, CreateRectangleParams, CreateTextParams,
    DeleteMultipleNodesEnvelope, DeleteMultipleNodesParams, ExportUnit, FillUnit, FontUnit,
    HelpParams, InstanceUnit, LayoutUnit, MoveUnit, NoParams, NodeIdParams, OpacityUnit,
    RenameUnit, ResizeUnit, ScanNodesByTypesParams, SetCornerRadiusParams,
    SetMultipleTextContentsEnvelope, SetMultipleTextContentsParams, StrokeUnit,
};
use validation::ParamSchema;

// ── Command metadata ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandCategory {
    Document,
    Create,
    Modify,
    Text,
    Scan,
    Export,
    Help,
}

impl CommandCategory {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Text => "text",
            Self::Scan => "scan",
            Self::Export => "export",
            Self::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Document => "Read document, selection, node, style and component info",
            Self::Create => "Create shapes, frames, text, clones and component instances",
            Self::Modify => "Move, resize, rename, recolour, restyle and delete nodes",
            Self::Text => "Replace text content in bulk",
            Self::Scan => "Walk a subtree and collect nodes, with progress updates",
            Self::Export => "Render nodes to images",
            Self::Help => "Command discovery",
        }
    }

    pub fn all() -> &'static [CommandCategory] {
        &[
            Self::Document,
            Self::Create,
            Self::Modify,
            Self::Text,
            Self::Scan,
            Self::Export,
            Self::Help,
        ]
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.slug() == slug)
    }
}

/// How a command is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Forwarded as one remote command.
    Single,
    /// Forwarded as one remote command that reports progress; gets the long timeout.
    LongRunning,
    /// Singular-or-plural input, one remote command per unit.
    Batch,
    /// One remote command per item, paced in chunks with progress.
    Chunked,
    /// Answered by the bridge itself.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub category: CommandCategory,
    pub kind: CommandKind,
}

// ── Handlers and descriptors ────────────────────────────────────

/// Everything a handler may touch while running one command.
#[derive(Clone)]
pub struct DispatchContext {
    pub executor: Arc<dyn Executor>,
    pub progress: Arc<dyn ProgressSink>,
    pub settings: Arc<BridgeSettings>,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// `params` has already passed the descriptor's schema.
    async fn handle(
        &self,
        registry: &Registry,
        ctx: &DispatchContext,
        params: Value,
    ) -> Result<Value, BridgeError>;
}

pub struct CommandDescriptor {
    pub info: CommandInfo,
    /// Checked before the handler runs.
    pub schema: ParamSchema,
    /// Advertised to tool-calling clients. Differs from `schema` for batch
    /// commands, whose units are validated one by one.
    pub surface_schema: Value,
    pub handler: Arc<dyn CommandHandler>,
}

impl CommandDescriptor {
    pub fn new(info: CommandInfo, schema: ParamSchema, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            info,
            surface_schema: schema.as_value().clone(),
            schema,
            handler,
        }
    }

    /// Advertise `surface` instead of the checked schema.
    pub fn with_surface_schema(mut self, surface: Value) -> Self {
        self.surface_schema = surface;
        self
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

// ── define_commands! macro ──────────────────────────────────────

/// Single source of truth for the built-in catalogue. Generates:
/// 1. `BuiltinCommand` enum (closed set of names)
/// 2. `BuiltinCommand::ALL`
/// 3. `BuiltinCommand::name()` / `from_name()`
/// 4. `BuiltinCommand::info()`: name, description, category, kind; `remote()`
/// 5. `BuiltinCommand::descriptor()`: schema plus handler, ready to register
macro_rules! define_commands {
    (
        forward {
            $(
                [ $fc:expr $(, $ff:ident)* ]
                $fv:ident ( $fp:ty )
                => $fn:literal : $fd:literal ;
            )*
        }
        batch {
            $(
                [ $bc:expr ]
                $bv:ident ( $bu:ty ) {
                    $bs:literal / $bpl:literal => $br:literal,
                    key: $bk:literal, $bpol:ident, $bmode:ident
                }
                => $bn:literal : $bd:literal ;
            )*
        }
        handled {
            $(
                [ $hc:expr, $hk:ident ]
                $hv:ident ( $hp:ty $(; envelope $he:ty)? )
                => $hh:expr, $hn:literal : $hd:literal ;
            )*
        }
    ) => {
        // ── 1. BuiltinCommand enum ──
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum BuiltinCommand {
            $( $fv, )*
            $( $bv, )*
            $( $hv, )*
        }

        impl BuiltinCommand {
            // ── 2. ALL ──
            pub const ALL: &'static [BuiltinCommand] = &[
                $( BuiltinCommand::$fv, )*
                $( BuiltinCommand::$bv, )*
                $( BuiltinCommand::$hv, )*
            ];

            // ── 3. name() / from_name() ──
            pub fn name(self) -> &'static str {
                match self {
                    $( BuiltinCommand::$fv => $fn, )*
                    $( BuiltinCommand::$bv => $bn, )*
                    $( BuiltinCommand::$hv => $hn, )*
                }
            }

            pub fn from_name(name: &str) -> Option<BuiltinCommand> {
                match name {
                    $( $fn => Some(BuiltinCommand::$fv), )*
                    $( $bn => Some(BuiltinCommand::$bv), )*
                    $( $hn => Some(BuiltinCommand::$hv), )*
                    _ => None,
                }
            }

            // ── 4. info() ──
            pub fn info(self) -> CommandInfo {
                match self {
                    $( BuiltinCommand::$fv => CommandInfo {
                        name: $fn,
                        description: $fd,
                        category: $fc,
                        kind: if define_commands!(@has_flag long_running; $($ff)*) {
                            CommandKind::LongRunning
                        } else {
                            CommandKind::Single
                        },
                    }, )*
                    $( BuiltinCommand::$bv => CommandInfo {
                        name: $bn,
                        description: $bd,
                        category: $bc,
                        kind: CommandKind::Batch,
                    }, )*
                    $( BuiltinCommand::$hv => CommandInfo {
                        name: $hn,
                        description: $hd,
                        category: $hc,
                        kind: CommandKind::$hk,
                    }, )*
                }
            }

            /// The host command this one sends; `None` when the bridge
            /// carries it out itself.
            pub fn remote(self) -> Option<&'static str> {
                match self {
                    $( BuiltinCommand::$fv => Some($fn), )*
                    $( BuiltinCommand::$bv => Some($br), )*
                    $( BuiltinCommand::$hv => None, )*
                }
            }

            // ── 5. descriptor() ──
            pub fn descriptor(self) -> CommandDescriptor {
                let info = self.info();
                match self {
                    $( BuiltinCommand::$fv => CommandDescriptor::new(
                        info,
                        ParamSchema::of::<$fp>(),
                        Arc::new(forward::Forward::new(
                            $fn,
                            define_commands!(@has_flag long_running; $($ff)*),
                        )),
                    ), )*
                    $( BuiltinCommand::$bv => batch::descriptor(
                        info,
                        BatchSpec {
                            remote: $br,
                            singular: $bs,
                            plural: $bpl,
                            key_field: $bk,
                            policy: BatchPolicy::$bpol,
                            mode: DispatchMode::$bmode,
                        },
                        ParamSchema::of::<$bu>(),
                    ), )*
                    $( BuiltinCommand::$hv => define_commands!(
                        @handled info, $hh, $hp $(, $he)?
                    ), )*
                }
            }
        }
    };

    // Flag helper. Literal tokens match before metavariables, so `long_running`
    // hits the first arm and any other ident falls through to the recursive one.
    (@has_flag long_running; long_running $($rest:ident)*) => { true };
    (@has_flag long_running; $_other:ident $($rest:ident)*) => { define_commands!(@has_flag long_running; $($rest)*) };
    (@has_flag long_running;) => { false };

    // Handled commands advertise `$hp`. With an envelope, the registry checks
    // only the envelope and the handler checks each item.
    (@handled $info:ident, $hh:expr, $hp:ty) => {
        CommandDescriptor::new($info, ParamSchema::of::<$hp>(), Arc::new($hh))
    };
    (@handled $info:ident, $hh:expr, $hp:ty, $he:ty) => {
        CommandDescriptor::new($info, ParamSchema::of::<$he>(), Arc::new($hh))
            .with_surface_schema(ParamSchema::of::<$hp>().as_value().clone())
    };
}

// ── Command definitions ─────────────────────────────────────────

define_commands! {
    forward {
        // ── Document (5) ────────────────────────────────────────
        [CommandCategory::Document]
        GetDocumentInfo(NoParams)
        => "get_document_info": "Get the current document: name, pages, and top-level nodes of the current page.";

        [CommandCategory::Document]
        GetSelection(NoParams)
        => "get_selection": "Get the nodes currently selected in the editor.";

        [CommandCategory::Document]
        GetNodeInfo(NodeIdParams)
        => "get_node_info": "Get detailed information about one node.";

        [CommandCategory::Document]
        GetStyles(NoParams)
        => "get_styles": "List the paint, text, effect and grid styles of the document.";

        [CommandCategory::Document]
        GetLocalComponents(NoParams)
        => "get_local_components": "List the components defined in the document.";

        // ── Create (3) ──────────────────────────────────────────
        [CommandCategory::Create]
        CreateRectangle(CreateRectangleParams)
        => "create_rectangle": "Create a rectangle, optionally inside a parent frame.";

        [CommandCategory::Create]
        CreateFrame(CreateFrameParams)
        => "create_frame": "Create a frame with optional fill, stroke and auto layout.";

        [CommandCategory::Create]
        CreateText(CreateTextParams)
        => "create_text": "Create a text node.";

        // ── Modify (1) ──────────────────────────────────────────
        [CommandCategory::Modify]
        SetCornerRadius(SetCornerRadiusParams)
        => "set_corner_radius": "Set the corner radius of a node, optionally per corner.";

        // ── Scan (2, long-running) ──────────────────────────────
        [CommandCategory::Scan, long_running]
        ScanTextNodes(NodeIdParams)
        => "scan_text_nodes": "Collect every text node under a node. Streams command_progress while it runs.";

        [CommandCategory::Scan, long_running]
        ScanNodesByTypes(ScanNodesByTypesParams)
        => "scan_nodes_by_types": "Collect nodes of the given types under a node. Streams command_progress while it runs.";
    }
    batch {
        [CommandCategory::Document]
        GetNodesInfo(NodeIdParams) {
            "node" / "nodes" => "get_node_info", key: "nodeId", AnySuccess, Concurrent
        }
        => "get_nodes_info": "Get information about one node (`node`) or many (`nodes`).";

        [CommandCategory::Modify]
        MoveNodes(MoveUnit) {
            "move" / "moves" => "move_node", key: "nodeId", AnySuccess, Sequential
        }
        => "move_nodes": "Move one node (`move`) or many (`moves`) to absolute positions.";

        [CommandCategory::Modify]
        ResizeNodes(ResizeUnit) {
            "resize" / "resizes" => "resize_node", key: "nodeId", AnySuccess, Sequential
        }
        => "resize_nodes": "Resize one node (`resize`) or many (`resizes`).";

        [CommandCategory::Modify]
        RenameLayers(RenameUnit) {
            "rename" / "renames" => "rename_layer", key: "nodeId", AnySuccess, Sequential
        }
        => "rename_layers": "Rename one layer (`rename`) or many (`renames`).";

        [CommandCategory::Modify]
        SetFillColors(FillUnit) {
            "fill" / "fills" => "set_fill_color", key: "nodeId", AnySuccess, Sequential
        }
        => "set_fill_colors": "Set the solid fill of one node (`fill`) or many (`fills`).";

        [CommandCategory::Modify]
        SetStrokeColors(StrokeUnit) {
            "stroke" / "strokes" => "set_stroke_color", key: "nodeId", AnySuccess, Sequential
        }
        => "set_stroke_colors": "Set the stroke colour and weight of one node (`stroke`) or many (`strokes`).";

        [CommandCategory::Modify]
        SetNodeOpacity(OpacityUnit) {
            "entry" / "entries" => "set_opacity", key: "nodeId", AnySuccess, Sequential
        }
        => "set_node_opacity": "Set the opacity of one node (`entry`) or many (`entries`).";

        [CommandCategory::Modify]
        SetFonts(FontUnit) {
            "font" / "fonts" => "set_font", key: "nodeId", AnySuccess, Sequential
        }
        => "set_fonts": "Set font family, style, size or weight on one text node (`font`) or many (`fonts`).";

        [CommandCategory::Modify]
        SetLayoutModes(LayoutUnit) {
            "layout" / "layouts" => "set_layout_mode", key: "nodeId", AnySuccess, Sequential
        }
        => "set_layout_modes": "Set the auto layout mode of one frame (`layout`) or many (`layouts`).";

        [CommandCategory::Create]
        CloneNodes(CloneUnit) {
            "clone" / "clones" => "clone_node", key: "nodeId", AllSucceed, Sequential
        }
        => "clone_nodes": "Duplicate one node (`clone`) or many (`clones`). Fails if any clone fails.";

        [CommandCategory::Create]
        CreateComponentInstances(InstanceUnit) {
            "instance" / "instances" => "create_component_instance", key: "componentKey", AllSucceed, Sequential
        }
        => "create_component_instances": "Place one component instance (`instance`) or many (`instances`). Fails if any placement fails.";

        [CommandCategory::Export]
        ExportNodesAsImages(ExportUnit) {
            "export" / "exports" => "export_node_as_image", key: "nodeId", AnySuccess, Concurrent
        }
        => "export_nodes_as_images": "Export one node (`export`) or many (`exports`) as PNG, JPG, SVG or PDF.";
    }
    handled {
        [CommandCategory::Text, Chunked]
        SetMultipleTextContents(SetMultipleTextContentsParams; envelope SetMultipleTextContentsEnvelope)
        => chunked::SetMultipleTextContents, "set_multiple_text_contents": "Replace the content of many text nodes, in chunks, with progress updates.";

        [CommandCategory::Modify, Chunked]
        DeleteMultipleNodes(DeleteMultipleNodesParams; envelope DeleteMultipleNodesEnvelope)
        => chunked::DeleteMultipleNodes, "delete_multiple_nodes": "Delete many nodes, in chunks, with progress updates.";

        [CommandCategory::Help, Local]
        Help(HelpParams)
        => local::Help, "help": "Discover available commands. Call with no args for all categories, or with a topic for details.";
    }
}

// ── Registry ────────────────────────────────────────────────────

/// What happens when a name is registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    Reject,
    Replace,
}

/// Name → descriptor table. Built once at startup, read on every call.
pub struct Registry {
    commands: IndexMap<&'static str, CommandDescriptor>,
    duplicates: DuplicatePolicy,
}

impl Registry {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self {
            commands: IndexMap::new(),
            duplicates,
        }
    }

    /// A registry holding the whole built-in catalogue.
    pub fn with_builtin(duplicates: DuplicatePolicy) -> Result<Self, BridgeError> {
        let mut registry = Self::new(duplicates);
        for command in BuiltinCommand::ALL {
            registry.register(command.descriptor())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<(), BridgeError> {
        let name = descriptor.info.name;
        if let Some(message) = descriptor.schema.compile_error() {
            return Err(BridgeError::InvalidSchema {
                name: name.to_string(),
                message: message.to_string(),
            });
        }
        if self.commands.contains_key(name) && self.duplicates == DuplicatePolicy::Reject {
            return Err(BridgeError::DuplicateCommand {
                name: name.to_string(),
            });
        }
        self.commands.insert(name, descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CommandDescriptor> {
        self.commands.get(name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Look up `name` and check `params` against its schema without running
    /// anything. Null params count as `{}`.
    pub fn validate(&self, name: &str, params: &Value) -> Result<&CommandDescriptor, BridgeError> {
        let descriptor = self.get(name).ok_or_else(|| BridgeError::UnknownCommand {
            name: name.to_string(),
        })?;
        let empty = Value::Object(serde_json::Map::new());
        let params = if params.is_null() { &empty } else { params };
        descriptor.schema.validate(params)?;
        Ok(descriptor)
    }

    /// Validate and run one command. Nothing reaches the executor unless the
    /// params pass the schema.
    pub async fn dispatch(
        &self,
        name: &str,
        params: Value,
        ctx: &DispatchContext,
    ) -> Result<Value, BridgeError> {
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params
        };
        let descriptor = self.validate(name, &params)?;
        debug!(command = name, kind = ?descriptor.info.kind, "dispatching");
        descriptor.handler.handle(self, ctx, params).await
    }
}
