// CLI binary: panicking on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::unreachable, clippy::indexing_slicing)]

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use design_bridge::paths;
use design_bridge::registry::{catalog, Registry};
use design_bridge::settings::{self, BridgeSettings};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "design-bridge-cli", about = "Design bridge command-line client", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory override
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Bridge HTTP port (defaults to the port file written by the server)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List every command with its input schema
    Tools,
    /// Show the two meta-tools an agent is given
    LlmTools,
    /// Browse the command catalogue
    Help { topic: Option<String> },
    /// Check params against a command's schema without running it
    Validate {
        command: String,
        /// Params as JSON (default: {})
        params: Option<String>,
    },
    /// Run a command on the bridge
    Run {
        command: String,
        /// Params as JSON (default: {})
        params: Option<String>,
    },
    /// Bridge and host connection status
    Health,
    /// Show a notification in the design host
    Notify { message: String },
    /// Print the effective settings
    Settings,
}

// ── Helpers ──────────────────────────────────────────────────────

fn parse_params(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Object(serde_json::Map::new()),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
            eprintln!("Error: params are not valid JSON: {e}");
            process::exit(2);
        }),
    }
}

fn load_settings(config_dir: &Path) -> BridgeSettings {
    match settings::load_settings(config_dir) {
        Ok(loaded) => loaded.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn offline_registry(config_dir: &Path) -> Registry {
    let policy = load_settings(config_dir).duplicate_policy;
    Registry::with_builtin(policy).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        process::exit(1);
    })
}

fn resolve_port(config_dir: &Path, explicit: Option<u16>) -> u16 {
    if let Some(port) = explicit {
        return port;
    }
    let path = paths::port_file_path(config_dir);
    let port = std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.trim().parse::<u16>().ok());
    port.unwrap_or_else(|| {
        eprintln!(
            "Error: no running bridge found ({} missing). Start design-bridge or pass --port.",
            path.display()
        );
        process::exit(1);
    })
}

// ── HTTP ─────────────────────────────────────────────────────────

struct BridgeHttp {
    base: String,
    client: reqwest::blocking::Client,
}

impl BridgeHttp {
    fn new(port: u16, timeout: Duration) -> Self {
        Self {
            base: format!("http://127.0.0.1:{port}/api"),
            client: reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .expect("http client"),
        }
    }

    /// Returns the decoded `{ ok, data | error }` envelope.
    fn handle(&self, resp: reqwest::Result<reqwest::blocking::Response>) -> Value {
        let resp = resp.unwrap_or_else(|e| {
            eprintln!("Error: bridge unreachable at {}: {e}", self.base);
            process::exit(1);
        });
        resp.json::<Value>().unwrap_or_else(|e| {
            eprintln!("Error: bridge sent an unreadable response: {e}");
            process::exit(1);
        })
    }

    fn get(&self, path: &str) -> Value {
        self.handle(self.client.get(format!("{}{path}", self.base)).send())
    }

    fn post(&self, path: &str, body: &Value) -> Value {
        self.handle(self.client.post(format!("{}{path}", self.base)).json(body).send())
    }
}

// ── Output ───────────────────────────────────────────────────────

fn print_value(value: &Value) {
    match value {
        Value::String(s) => println!("{s}"),
        Value::Null => println!("OK"),
        other => println!("{}", serde_json::to_string_pretty(other).unwrap_or_default()),
    }
}

fn print_envelope(envelope: &Value, raw_json: bool) {
    if raw_json {
        println!("{}", serde_json::to_string_pretty(envelope).unwrap_or_default());
    } else if envelope["ok"] == Value::Bool(true) {
        print_value(&envelope["data"]);
    } else {
        let error = &envelope["error"];
        let message = error["message"].as_str().unwrap_or("unknown error");
        eprintln!("Error: {message}");
        if let Some(results) = error["detail"]["results"].as_array() {
            for unit in results.iter().filter(|u| u["success"] == Value::Bool(false)) {
                eprintln!(
                    "  [{}] {}",
                    unit["index"],
                    unit["error"].as_str().unwrap_or("failed")
                );
            }
        }
    }
    if envelope["ok"] != Value::Bool(true) {
        process::exit(1);
    }
}

// ── Main ─────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.clone().unwrap_or_else(paths::default_config_dir);
    let raw = cli.json;

    match &cli.command {
        Commands::Tools => {
            let registry = offline_registry(&config_dir);
            let tools = catalog::to_json_schema(&registry);
            if raw {
                print_value(&tools);
            } else {
                for tool in tools.as_array().into_iter().flatten() {
                    println!(
                        "{:<32} {:<12} {}",
                        tool["name"].as_str().unwrap_or_default(),
                        tool["category"].as_str().unwrap_or_default(),
                        tool["description"].as_str().unwrap_or_default()
                    );
                }
            }
        }
        Commands::LlmTools => {
            print_value(&catalog::to_llm_tools());
        }
        Commands::Help { topic } => {
            let registry = offline_registry(&config_dir);
            println!("{}", catalog::help_text(&registry, topic.as_deref()));
        }
        Commands::Validate { command, params } => {
            let registry = offline_registry(&config_dir);
            let params = parse_params(params.as_deref());
            match registry.validate(command, &params) {
                Ok(descriptor) => println!("OK: {} ({:?})", descriptor.info.name, descriptor.info.kind),
                Err(e) => {
                    eprintln!("Invalid: {e}");
                    process::exit(1);
                }
            }
        }
        Commands::Run { command, params } => {
            let params = parse_params(params.as_deref());
            let settings = load_settings(&config_dir);
            // Long scans may legitimately run past the short timeout.
            let http = BridgeHttp::new(
                resolve_port(&config_dir, cli.port),
                settings.long_request_timeout() + Duration::from_secs(5),
            );
            print_envelope(&http.post(&format!("/command/{command}"), &params), raw);
        }
        Commands::Health => {
            let http = BridgeHttp::new(resolve_port(&config_dir, cli.port), Duration::from_secs(5));
            print_envelope(&http.get("/health"), raw);
        }
        Commands::Notify { message } => {
            let http = BridgeHttp::new(resolve_port(&config_dir, cli.port), Duration::from_secs(5));
            let body = serde_json::json!({ "message": message });
            print_envelope(&http.post("/notify", &body), raw);
        }
        Commands::Settings => {
            let settings = load_settings(&config_dir);
            println!("{}", serde_json::to_string_pretty(&settings).unwrap_or_default());
        }
    }
}
