use serde_json::{json, Value};

use super::{CommandCategory, CommandDescriptor, Registry};

/// Generate the minimal `tools` array for tool-calling clients.
/// Instead of dumping every command schema we expose two meta-tools,
/// `help` and `run`; specific commands are discovered through `help`.
pub fn to_llm_tools() -> Value {
    json!([
        {
            "name": "help",
            "description": "Discover available commands. No args = list categories. Provide a category name to see its commands, or a command name to see its full parameter schema.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "Category name (e.g. 'modify') or command name (e.g. 'rename_layers')"
                    }
                }
            }
        },
        {
            "name": "run",
            "description": "Execute a single command. Use help() first to discover command names and parameters.",
            "input_schema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Command name (e.g. 'get_selection', 'move_nodes')" },
                    "params": { "type": "object", "description": "Command parameters (see help for schema)" }
                },
                "required": ["command"]
            }
        }
    ])
}

/// Generate help text for command discovery.
/// Three tiers: no topic → categories, category → command list, command → full schema.
pub fn help_text(registry: &Registry, topic: Option<&str>) -> String {
    match topic.map(str::trim).filter(|t| !t.is_empty()) {
        None => {
            let mut lines = vec!["Available command categories:".to_string()];
            for category in CommandCategory::all() {
                let count = registry
                    .descriptors()
                    .filter(|d| d.info.category == *category)
                    .count();
                if count > 0 {
                    lines.push(format!(
                        "  {} ({count}): {}",
                        category.slug(),
                        category.description()
                    ));
                }
            }
            lines.push(String::new());
            lines.push("Use help({topic: \"modify\"}) to list commands in a category.".to_string());
            lines.push("Use help({topic: \"rename_layers\"}) for full parameter details.".to_string());
            lines.join("\n")
        }
        Some(topic) => {
            if let Some(descriptor) = registry.get(topic) {
                return command_help(descriptor);
            }

            let matching: Vec<&CommandDescriptor> = match CommandCategory::from_slug(&topic.to_lowercase()) {
                Some(category) => registry
                    .descriptors()
                    .filter(|d| d.info.category == category)
                    .collect(),
                None => Vec::new(),
            };

            if matching.is_empty() {
                format!("Unknown topic: \"{topic}\". Use help() to see categories and commands.")
            } else {
                let mut lines = vec![format!("{topic} commands:")];
                for descriptor in &matching {
                    lines.push(format!(
                        "  - {}: {}",
                        descriptor.info.name, descriptor.info.description
                    ));
                }
                lines.push(String::new());
                lines.push("Use help({topic: \"command_name\"}) for parameter details.".to_string());
                lines.join("\n")
            }
        }
    }
}

fn command_help(descriptor: &CommandDescriptor) -> String {
    let schema_str = serde_json::to_string_pretty(&descriptor.surface_schema)
        .unwrap_or_else(|_| "{}".to_string());
    let kind = serde_json::to_value(descriptor.info.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!(
        "{}: {}\nCategory: {} | Kind: {kind}\n\nParameters:\n{schema_str}",
        descriptor.info.name,
        descriptor.info.description,
        descriptor.info.category.slug(),
    )
}

/// JSON Schema formatted tool list (for REST and the CLI).
pub fn to_json_schema(registry: &Registry) -> Value {
    Value::Array(
        registry
            .descriptors()
            .map(|d| {
                json!({
                    "name": d.info.name,
                    "description": d.info.description,
                    "category": d.info.category.slug(),
                    "kind": d.info.kind,
                    "inputSchema": d.surface_schema,
                })
            })
            .collect(),
    )
}
