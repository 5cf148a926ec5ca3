use std::path::PathBuf;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use design_bridge::api;
use design_bridge::demo::{DemoHost, Document};
use design_bridge::error::BridgeError;
use design_bridge::logging;
use design_bridge::paths;
use design_bridge::settings;
use design_bridge::state::BridgeState;
use design_bridge::transport::Connection;

#[derive(Parser)]
#[command(
    name = "design-bridge",
    about = "Bridge between tool-calling agents and a design host",
    version
)]
struct Args {
    /// Config directory (settings file and port file)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Serve an in-process sample document instead of waiting for a host
    #[arg(long)]
    demo_host: bool,

    /// Port the design host plugin connects to
    #[arg(long)]
    host_port: Option<u16>,

    /// Port for the HTTP tool surface (0 = any free port)
    #[arg(long)]
    api_port: Option<u16>,

    /// Log level or filter directive; RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "bridge stopped");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BridgeError> {
    let config_dir = args.config_dir.unwrap_or_else(paths::default_config_dir);
    let mut bridge_settings = settings::load_settings(&config_dir)?.unwrap_or_default();
    if let Some(port) = args.host_port {
        bridge_settings.host_port = port;
    }
    if let Some(port) = args.api_port {
        bridge_settings.api_port = port;
    }
    if let Some(level) = args.log_level {
        bridge_settings.log_level = level;
    }
    logging::init(&bridge_settings.log_level);

    let host_port = bridge_settings.host_port;
    let api_port = bridge_settings.api_port;
    let scan_plan = bridge_settings.scan_plan();
    let state = Arc::new(BridgeState::new(bridge_settings, config_dir.clone())?);
    info!(
        commands = state.registry.len(),
        config_dir = %config_dir.display(),
        "design bridge starting"
    );

    let port = api::start_api_server(Arc::clone(&state), api_port).await?;
    state.api_port.store(port, Ordering::Relaxed);
    write_port_file(&config_dir, port);

    // Keep the demo host alive for the life of the process.
    let _demo = if args.demo_host {
        let demo = DemoHost::new(Document::sample(), scan_plan);
        let (ours, theirs) = Connection::memory_pair();
        demo.serve(theirs);
        state.attach_host(ours);
        info!("serving the sample document in-process");
        Some(demo)
    } else {
        let listener = TcpListener::bind(("127.0.0.1", host_port)).await?;
        info!(port = host_port, "waiting for the design host");
        tokio::spawn(accept_hosts(listener, Arc::clone(&state)));
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Some(host) = state.host() {
        if let Err(e) = host.close_plugin() {
            warn!(error = %e, "could not tell the host to close");
        }
    }
    let _ = std::fs::remove_file(paths::port_file_path(&config_dir));
    Ok(())
}

/// Each accepted socket becomes the current host; the previous one is dropped.
async fn accept_hosts(listener: TcpListener, state: Arc<BridgeState>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!(peer = %peer, "design host connected");
                state.attach_host(Connection::from_stream(socket, &peer.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// Written for the CLI's benefit; failure only costs discovery.
fn write_port_file(config_dir: &std::path::Path, port: u16) {
    let path = paths::port_file_path(config_dir);
    let result = std::fs::create_dir_all(config_dir)
        .map_err(BridgeError::from)
        .and_then(|()| settings::atomic_write(&path, port.to_string().as_bytes()));
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "could not write port file");
    }
}
