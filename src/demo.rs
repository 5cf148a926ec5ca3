//! In-memory design document served through a [`HostRuntime`].
//!
//! Stands in for the real design host: `design-bridge --demo-host` and the
//! end-to-end tests run the whole bridge against it.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;

use crate::chunked::{ChunkPlan, ChunkedRunner};
use crate::dispatcher::unit_error_message;
use crate::error::BridgeError;
use crate::events::{DOCUMENT_CHANGE, SELECTION_CHANGE};
use crate::host::{HostCall, HostHandler, HostRuntime, SyncHandler};
use crate::registry::params::{
    CloneUnit, CreateFrameParams, CreateRectangleParams, CreateTextParams, ExportFormat,
    ExportUnit, FillUnit, FontUnit, InstanceUnit, LayoutMode, LayoutUnit, MoveUnit, NoParams,
    NodeIdParams, OpacityUnit, RenameUnit, ResizeUnit, Rgba, ScanNodesByTypesParams,
    SetCornerRadiusParams, StrokeUnit, TextReplacement,
};
use crate::transport::Connection;

pub const PAGE_ID: &str = "0:1";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub opacity: f64,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<Rgba>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corner_radius: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub characters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_mode: Option<LayoutMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub children: Vec<String>,
}

impl Node {
    pub fn new(node_type: &str, name: &str, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: String::new(),
            name: name.to_string(),
            node_type: node_type.to_string(),
            x,
            y,
            width,
            height,
            opacity: 1.0,
            locked: false,
            fill: None,
            stroke: None,
            corner_radius: None,
            characters: None,
            font: None,
            layout_mode: None,
            parent_id: None,
            children: Vec::new(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn text(name: &str, characters: &str, x: f64, y: f64) -> Self {
        let mut node = Self::new("TEXT", name, x, y, 8.0 * characters.len().max(1) as f64, 24.0);
        node.characters = Some(characters.to_string());
        node
    }

    fn is_container(&self) -> bool {
        matches!(self.node_type.as_str(), "PAGE" | "FRAME" | "COMPONENT" | "INSTANCE" | "GROUP")
    }

    fn summary(&self) -> Value {
        let mut summary = json!({
            "id": self.id,
            "name": self.name,
            "type": self.node_type,
            "x": self.x,
            "y": self.y,
            "width": self.width,
            "height": self.height,
        });
        if let (Some(obj), Some(chars)) = (summary.as_object_mut(), &self.characters) {
            obj.insert("characters".into(), Value::String(chars.clone()));
        }
        summary
    }
}

/// A single-page document. Node ids look like the host's (`1:23`).
pub struct Document {
    pub name: String,
    nodes: IndexMap<String, Node>,
    selection: Vec<String>,
    next_id: u64,
}

impl Document {
    pub fn new(name: &str) -> Self {
        let mut page = Node::new("PAGE", "Page 1", 0.0, 0.0, 0.0, 0.0);
        page.id = PAGE_ID.to_string();
        let mut nodes = IndexMap::new();
        nodes.insert(PAGE_ID.to_string(), page);
        Self {
            name: name.to_string(),
            nodes,
            selection: Vec::new(),
            next_id: 0,
        }
    }

    /// A small landing page: a header with five nav labels, a hero with a
    /// button, a card component and a locked background.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample() -> Self {
        let mut doc = Self::new("Landing page");

        let mut background = Node::new("RECTANGLE", "Background", 0.0, 0.0, 1200.0, 1200.0);
        background.locked = true;
        doc.insert(PAGE_ID, background);

        let header = doc.insert(PAGE_ID, Node::new("FRAME", "Header", 0.0, 0.0, 1200.0, 120.0));
        for (i, label) in ["Home", "Pricing", "Docs", "Blog", "Sign in"].iter().enumerate() {
            doc.insert(&header, Node::text(label, label, 40.0 + 120.0 * i as f64, 48.0));
        }

        let hero = doc.insert(PAGE_ID, Node::new("FRAME", "Hero", 0.0, 120.0, 1200.0, 600.0));
        doc.insert(&hero, Node::text("Title", "Design at the speed of thought", 80.0, 200.0));
        doc.insert(&hero, Node::text("Subtitle", "Every layer, one conversation away", 80.0, 260.0));
        let button = doc.insert(&hero, Node::new("FRAME", "Button", 80.0, 340.0, 160.0, 48.0));
        doc.insert(&button, Node::text("Label", "Get started", 100.0, 352.0));
        doc.insert(&hero, Node::new("RECTANGLE", "Hero image", 640.0, 160.0, 480.0, 400.0));

        let card = doc.insert(PAGE_ID, Node::new("COMPONENT", "Card", 0.0, 800.0, 320.0, 200.0));
        doc.insert(&card, Node::text("Card title", "Card title", 16.0, 816.0));
        doc.insert(&card, Node::text("Card body", "Short supporting copy", 16.0, 856.0));

        doc.selection = vec![hero];
        doc
    }

    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("1:{}", self.next_id)
    }

    /// Add `node` under `parent` with a fresh id. A missing parent puts it on the page.
    pub fn insert(&mut self, parent: &str, mut node: Node) -> String {
        node.id = self.fresh_id();
        let parent = if self.nodes.contains_key(parent) { parent } else { PAGE_ID };
        self.attach(parent, node)
    }

    fn attach(&mut self, parent: &str, mut node: Node) -> String {
        let id = node.id.clone();
        node.parent_id = Some(parent.to_string());
        if let Some(p) = self.nodes.get_mut(parent) {
            p.children.push(id.clone());
        }
        self.nodes.insert(id.clone(), node);
        id
    }

    pub fn node(&self, id: &str) -> Result<&Node, String> {
        self.nodes.get(id).ok_or_else(|| format!("Node not found: {id}"))
    }

    pub fn find_by_name(&self, name: &str) -> Option<String> {
        self.nodes.values().find(|n| n.name == name).map(|n| n.id.clone())
    }

    /// Number of nodes, not counting the page.
    pub fn len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn selection(&self) -> &[String] {
        &self.selection
    }

    fn editable(&mut self, id: &str) -> Result<&mut Node, String> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| format!("Node not found: {id}"))?;
        if node.node_type == "PAGE" {
            return Err("Pages cannot be modified".to_string());
        }
        if node.locked {
            return Err(format!("Node is locked: {}", node.name));
        }
        Ok(node)
    }

    /// Resolve where a created node goes: the given container, or the page.
    fn container(&self, parent_id: Option<&str>) -> Result<String, String> {
        let Some(parent) = parent_id else {
            return Ok(PAGE_ID.to_string());
        };
        let node = self.node(parent)?;
        if node.is_container() {
            Ok(node.id.clone())
        } else {
            Err(format!("Node {parent} ({}) cannot contain children", node.node_type))
        }
    }

    /// Every node under `root`, depth first, in layer order.
    pub fn descendants(&self, root: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = self
            .nodes
            .get(root)
            .map(|n| n.children.iter().rev().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                stack.extend(node.children.iter().rev().map(String::as_str));
            }
        }
        out
    }

    fn copy_subtree(&mut self, id: &str, parent: &str) -> Result<String, String> {
        let mut copy = self.node(id)?.clone();
        let children = std::mem::take(&mut copy.children);
        copy.id = self.fresh_id();
        copy.locked = false;
        let new_id = self.attach(parent, copy);
        for child in children {
            self.copy_subtree(&child, &new_id)?;
        }
        Ok(new_id)
    }

    fn shift(&mut self, root: &str, dx: f64, dy: f64) {
        let mut ids = self.descendants(root);
        ids.push(root.to_string());
        for id in ids {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.x += dx;
                node.y += dy;
            }
        }
    }

    /// Remove a node and its subtree. Returns every removed id.
    fn remove(&mut self, id: &str) -> Result<Vec<String>, String> {
        let parent = self.editable(id)?.parent_id.clone();
        let mut doomed = vec![id.to_string()];
        doomed.extend(self.descendants(id));
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            p.children.retain(|c| c != id);
        }
        for d in &doomed {
            self.nodes.shift_remove(d);
        }
        self.selection.retain(|s| !doomed.contains(s));
        Ok(doomed)
    }

    fn info(&self) -> Value {
        let children: Vec<Value> = self
            .nodes
            .get(PAGE_ID)
            .map(|page| {
                page.children
                    .iter()
                    .filter_map(|id| self.nodes.get(id))
                    .map(|n| json!({ "id": n.id, "name": n.name, "type": n.node_type }))
                    .collect()
            })
            .unwrap_or_default();
        json!({
            "name": self.name,
            "currentPage": { "id": PAGE_ID, "name": "Page 1", "childCount": children.len() },
            "pages": [{ "id": PAGE_ID, "name": "Page 1" }],
            "children": children,
        })
    }

    fn selection_info(&self) -> Value {
        let nodes: Vec<Value> = self
            .selection
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(Node::summary)
            .collect();
        json!({ "selectionCount": nodes.len(), "selection": nodes })
    }
}

// ── Host handlers ───────────────────────────────────────────────

fn parse<P: DeserializeOwned>(params: Value) -> Result<P, String> {
    serde_json::from_value(params).map_err(|e| format!("Invalid params: {e}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Wrap a document operation as a host handler. The document lock is held
/// for the whole (synchronous) operation.
fn op<P, F>(doc: &Arc<Mutex<Document>>, f: F) -> Arc<dyn HostHandler>
where
    P: DeserializeOwned + 'static,
    F: Fn(&mut Document, P, &HostCall) -> Result<Value, String> + Send + Sync + 'static,
{
    let doc = Arc::clone(doc);
    Arc::new(SyncHandler(move |call: &HostCall, params: Value| -> Result<Value, String> {
        let params: P = parse(params)?;
        let mut doc = doc.lock();
        f(&mut doc, params, call)
    }))
}

fn changed(call: &HostCall, kind: &str, id: &str) {
    let mut payload = Map::new();
    payload.insert("changes".into(), json!([{ "type": kind, "id": id }]));
    call.emit_event(DOCUMENT_CHANGE, payload);
}

fn mime_type(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Png => "image/png",
        ExportFormat::Jpg => "image/jpeg",
        ExportFormat::Svg => "image/svg+xml",
        ExportFormat::Pdf => "application/pdf",
    }
}

#[derive(Debug, Clone, Copy)]
enum ScanFilter {
    Text,
    Types,
}

/// Host-side chunked scan: enumerate matching nodes, then summarise them in
/// chunks, streaming progress back to the caller.
struct Scan {
    doc: Arc<Mutex<Document>>,
    plan: ChunkPlan,
    filter: ScanFilter,
}

#[async_trait]
impl HostHandler for Scan {
    async fn call(&self, call: &HostCall, params: Value) -> Result<Value, String> {
        let (root, types) = match self.filter {
            ScanFilter::Text => {
                let p: NodeIdParams = parse(params)?;
                (p.node_id, vec!["TEXT".to_string()])
            }
            ScanFilter::Types => {
                let p: ScanNodesByTypesParams = parse(params)?;
                (p.node_id, p.types)
            }
        };

        let listing: Result<Vec<String>, BridgeError> = {
            let doc = self.doc.lock();
            match doc.node(&root) {
                Ok(_) => Ok(doc
                    .descendants(&root)
                    .into_iter()
                    .filter(|id| doc.node(id).is_ok_and(|n| types.contains(&n.node_type)))
                    .collect()),
                Err(message) => Err(BridgeError::Execution {
                    command: call.command.clone(),
                    message,
                }),
            }
        };

        let doc = &self.doc;
        let mut tracker = call.tracker();
        let report = ChunkedRunner::new(self.plan)
            .run(&mut tracker, async { listing }, |id: String| {
                let summary = doc.lock().node(&id).map(Node::summary);
                async move { summary }
            })
            .await
            .map_err(unit_error_message)?;

        let count = report.succeeded;
        let nodes: Vec<Value> = report.items.into_iter().filter_map(|item| item.result).collect();
        Ok(match self.filter {
            ScanFilter::Text => json!({
                "success": true,
                "nodeId": root,
                "count": count,
                "textNodes": nodes,
            }),
            ScanFilter::Types => json!({
                "success": true,
                "nodeId": root,
                "count": count,
                "searchedTypes": types,
                "matchingNodes": nodes,
            }),
        })
    }
}

/// The demo host: a shared document plus the handler table over it.
pub struct DemoHost {
    doc: Arc<Mutex<Document>>,
    scan_plan: ChunkPlan,
}

impl DemoHost {
    pub fn new(doc: Document, scan_plan: ChunkPlan) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
            scan_plan,
        }
    }

    pub fn document(&self) -> Arc<Mutex<Document>> {
        Arc::clone(&self.doc)
    }

    /// Serve `conn` on a background task.
    pub fn serve(&self, conn: Connection) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self.runtime()).serve(conn))
    }

    pub fn runtime(&self) -> HostRuntime {
        let doc = &self.doc;
        let mut rt = HostRuntime::new();

        // ── Reads ──
        rt.register("get_document_info", op(doc, |d, _: NoParams, _| Ok(d.info())));
        rt.register("get_selection", op(doc, |d, _: NoParams, _| Ok(d.selection_info())));
        rt.register(
            "get_node_info",
            op(doc, |d, p: NodeIdParams, _| d.node(&p.node_id).and_then(to_json)),
        );
        rt.register(
            "get_styles",
            op(doc, |_, _: NoParams, _| {
                Ok(json!({ "colors": [], "texts": [], "effects": [], "grids": [] }))
            }),
        );
        rt.register(
            "get_local_components",
            op(doc, |d, _: NoParams, _| {
                let components: Vec<Value> = d
                    .nodes
                    .values()
                    .filter(|n| n.node_type == "COMPONENT")
                    .map(|n| json!({ "id": n.id, "name": n.name, "key": n.id }))
                    .collect();
                Ok(json!({ "count": components.len(), "components": components }))
            }),
        );

        // ── Creation ──
        rt.register(
            "create_rectangle",
            op(doc, |d, p: CreateRectangleParams, call| {
                let parent = d.container(p.parent_id.as_deref())?;
                let name = p.name.unwrap_or_else(|| "Rectangle".to_string());
                let id = d.insert(&parent, Node::new("RECTANGLE", &name, p.x, p.y, p.width, p.height));
                changed(call, "CREATE", &id);
                d.node(&id).map(Node::summary)
            }),
        );
        rt.register(
            "create_frame",
            op(doc, |d, p: CreateFrameParams, call| {
                let parent = d.container(p.parent_id.as_deref())?;
                let mut frame = Node::new(
                    "FRAME",
                    p.name.as_deref().unwrap_or("Frame"),
                    p.x,
                    p.y,
                    p.width,
                    p.height,
                );
                frame.fill = p.fill_color;
                frame.stroke = p
                    .stroke_color
                    .map(|c| json!({ "color": c, "weight": p.stroke_weight.unwrap_or(1.0) }));
                frame.layout_mode = p.layout_mode;
                let id = d.insert(&parent, frame);
                changed(call, "CREATE", &id);
                d.node(&id).map(Node::summary)
            }),
        );
        rt.register(
            "create_text",
            op(doc, |d, p: CreateTextParams, call| {
                let parent = d.container(p.parent_id.as_deref())?;
                let mut text = Node::text(p.name.as_deref().unwrap_or(&p.text), &p.text, p.x, p.y);
                text.fill = p.font_color;
                text.font = Some(json!({
                    "size": p.font_size.unwrap_or(14.0),
                    "weight": p.font_weight.unwrap_or(400),
                }));
                let id = d.insert(&parent, text);
                changed(call, "CREATE", &id);
                d.node(&id).map(Node::summary)
            }),
        );
        rt.register(
            "clone_node",
            op(doc, |d, p: CloneUnit, call| {
                let parent = d
                    .node(&p.node_id)?
                    .parent_id
                    .clone()
                    .unwrap_or_else(|| PAGE_ID.to_string());
                let id = d.copy_subtree(&p.node_id, &parent)?;
                let (x, y) = {
                    let n = d.node(&id)?;
                    (n.x, n.y)
                };
                d.shift(&id, p.x.map_or(0.0, |nx| nx - x), p.y.map_or(0.0, |ny| ny - y));
                changed(call, "CREATE", &id);
                d.node(&id).map(Node::summary)
            }),
        );
        rt.register(
            "create_component_instance",
            op(doc, |d, p: InstanceUnit, call| {
                if d.node(&p.component_key)?.node_type != "COMPONENT" {
                    return Err(format!("No component with key {}", p.component_key));
                }
                let parent = d.container(p.parent_id.as_deref())?;
                let id = d.copy_subtree(&p.component_key, &parent)?;
                let (x, y) = {
                    let n = d.node(&id)?;
                    (n.x, n.y)
                };
                d.shift(&id, p.x - x, p.y - y);
                if let Ok(instance) = d.editable(&id) {
                    instance.node_type = "INSTANCE".to_string();
                }
                changed(call, "CREATE", &id);
                d.node(&id).map(Node::summary)
            }),
        );

        // ── Modification ──
        rt.register(
            "move_node",
            op(doc, |d, p: MoveUnit, call| {
                let (x, y) = {
                    let n = d.editable(&p.node_id)?;
                    (n.x, n.y)
                };
                d.shift(&p.node_id, p.x - x, p.y - y);
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "x": p.x, "y": p.y }))
            }),
        );
        rt.register(
            "resize_node",
            op(doc, |d, p: ResizeUnit, call| {
                let n = d.editable(&p.node_id)?;
                n.width = p.width;
                n.height = p.height;
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "width": p.width, "height": p.height }))
            }),
        );
        rt.register(
            "rename_layer",
            op(doc, |d, p: RenameUnit, call| {
                if p.name.trim().is_empty() {
                    return Err("Name must not be empty".to_string());
                }
                let n = d.editable(&p.node_id)?;
                let old = std::mem::replace(&mut n.name, p.name.clone());
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "oldName": old, "name": p.name }))
            }),
        );
        rt.register(
            "set_fill_color",
            op(doc, |d, p: FillUnit, call| {
                d.editable(&p.node_id)?.fill = Some(p.color);
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "fill": p.color }))
            }),
        );
        rt.register(
            "set_stroke_color",
            op(doc, |d, p: StrokeUnit, call| {
                let stroke = json!({ "color": p.color, "weight": p.weight.unwrap_or(1.0) });
                d.editable(&p.node_id)?.stroke = Some(stroke.clone());
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "stroke": stroke }))
            }),
        );
        rt.register(
            "set_opacity",
            op(doc, |d, p: OpacityUnit, call| {
                d.editable(&p.node_id)?.opacity = p.opacity;
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "opacity": p.opacity }))
            }),
        );
        rt.register(
            "set_corner_radius",
            op(doc, |d, p: SetCornerRadiusParams, call| {
                d.editable(&p.node_id)?.corner_radius = Some(p.radius);
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "cornerRadius": p.radius, "corners": p.corners }))
            }),
        );
        rt.register(
            "set_font",
            op(doc, |d, p: FontUnit, call| {
                let n = d.editable(&p.node_id)?;
                if n.node_type != "TEXT" {
                    return Err(format!("Node {} is not a text node", p.node_id));
                }
                let mut font = n.font.clone().unwrap_or_else(|| json!({}));
                if let Some(obj) = font.as_object_mut() {
                    if let Some(family) = &p.family {
                        obj.insert("family".into(), json!(family));
                    }
                    if let Some(style) = &p.style {
                        obj.insert("style".into(), json!(style));
                    }
                    if let Some(size) = p.size {
                        obj.insert("size".into(), json!(size));
                    }
                    if let Some(weight) = p.weight {
                        obj.insert("weight".into(), json!(weight));
                    }
                }
                n.font = Some(font.clone());
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "font": font }))
            }),
        );
        rt.register(
            "set_layout_mode",
            op(doc, |d, p: LayoutUnit, call| {
                let n = d.editable(&p.node_id)?;
                if !matches!(n.node_type.as_str(), "FRAME" | "COMPONENT") {
                    return Err(format!("Node {} does not support auto layout", p.node_id));
                }
                n.layout_mode = Some(p.layout_mode);
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "layoutMode": p.layout_mode, "layoutWrap": p.layout_wrap }))
            }),
        );
        rt.register(
            "set_text_content",
            op(doc, |d, p: TextReplacement, call| {
                let n = d.editable(&p.node_id)?;
                if n.node_type != "TEXT" {
                    return Err(format!("Node {} is not a text node", p.node_id));
                }
                n.characters = Some(p.text.clone());
                changed(call, "PROPERTY_CHANGE", &p.node_id);
                Ok(json!({ "id": p.node_id, "characters": p.text }))
            }),
        );
        rt.register(
            "delete_node",
            op(doc, |d, p: NodeIdParams, call| {
                let before = d.selection.len();
                let removed = d.remove(&p.node_id)?;
                changed(call, "DELETE", &p.node_id);
                if d.selection.len() != before {
                    let mut payload = Map::new();
                    payload.insert("nodeIds".into(), json!(d.selection));
                    call.emit_event(SELECTION_CHANGE, payload);
                }
                Ok(json!({ "id": p.node_id, "removed": removed.len() }))
            }),
        );

        // ── Export ──
        rt.register(
            "export_node_as_image",
            op(doc, |d, p: ExportUnit, _| {
                let n = d.node(&p.node_id)?;
                let format = p.format.unwrap_or(ExportFormat::Png);
                let scale = p.scale.unwrap_or(1.0);
                Ok(json!({
                    "nodeId": p.node_id,
                    "format": format,
                    "mimeType": mime_type(format),
                    "scale": scale,
                    "width": n.width * scale,
                    "height": n.height * scale,
                }))
            }),
        );

        // ── Long-running scans ──
        rt.register(
            "scan_text_nodes",
            Arc::new(Scan {
                doc: Arc::clone(doc),
                plan: self.scan_plan,
                filter: ScanFilter::Text,
            }),
        );
        rt.register(
            "scan_nodes_by_types",
            Arc::new(Scan {
                doc: Arc::clone(doc),
                plan: self.scan_plan,
                filter: ScanFilter::Types,
            }),
        );

        rt
    }
}
