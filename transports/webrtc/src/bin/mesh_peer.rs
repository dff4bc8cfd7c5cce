//! Mesh peer binary entry point
//!
//! Joins a data channel mesh and bridges it to the terminal: every stdin line
//! is broadcast to all open peers and every received message is printed.
//!
//! # Usage
//!
//! ```bash
//! # Join a room on a hosted relay
//! cargo run --bin mesh_peer -- --mode relay --relay-url ws://localhost:3000 --room lobby
//!
//! # Negotiate with ourselves over two loopback connections
//! cargo run --bin mesh_peer -- --mode loopback --connections 2
//!
//! # Exchange payloads by hand; type /offer on one side, paste JSON on the other
//! cargo run --bin mesh_peer -- --mode manual
//!
//! # Split messages above 1 KiB into frames
//! cargo run --bin mesh_peer -- --mode loopback --framing --max-frame-bytes 1024
//! ```

use anyhow::Context;
use clap::Parser;
use rtc_mesh::{
    ConnectionPool, DataChannelMode, IceServerConfig, LocalSignaling, ManualSignaling, MeshConfig,
    RelaySignaling, Signaling, WebRtcSessionFactory,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Data channel mesh peer
///
/// Connects to other peers through the selected signaling backend and relays
/// text between them and the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Signaling backend
    #[arg(short, long, default_value = "relay", env = "MESH_MODE")]
    mode: SignalingMode,

    /// Relay WebSocket URL (relay mode only)
    #[arg(long, default_value = "ws://localhost:3000", env = "MESH_RELAY_URL")]
    relay_url: String,

    /// Room to join on the relay (relay mode only)
    #[arg(long, default_value = "lobby", env = "MESH_ROOM")]
    room: String,

    /// Number of loopback connections to open (loopback mode only)
    #[arg(long, default_value_t = 1, env = "MESH_LOOPBACK_CONNECTIONS")]
    connections: usize,

    /// Data channel label
    #[arg(long, default_value = rtc_mesh::config::DEFAULT_CHANNEL_NAME, env = "MESH_CHANNEL_NAME")]
    channel_name: String,

    /// Split outgoing messages into frames
    #[arg(long, default_value_t = false, env = "MESH_FRAMING")]
    framing: bool,

    /// Largest frame payload in bytes
    #[arg(long, default_value_t = rtc_mesh::config::DEFAULT_MAX_MESSAGE_SIZE_FOR_FRAME, env = "MESH_MAX_FRAME_BYTES")]
    max_frame_bytes: usize,

    /// Milliseconds before a partial message is dropped
    #[arg(long, default_value_t = rtc_mesh::config::DEFAULT_FRAMES_TIMEOUT_MS, env = "MESH_FRAMES_TIMEOUT_MS")]
    frames_timeout_ms: u64,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MESH_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// TURN servers (format: turn:host:port:username:password, comma-separated)
    #[arg(long, value_delimiter = ',', env = "MESH_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// Data channel mode: reliable, unreliable
    #[arg(long, default_value = "reliable", env = "MESH_DATA_CHANNEL_MODE")]
    data_channel_mode: DataChannelModeArg,

    /// Emit JSON logs
    #[arg(long, default_value_t = false, env = "MESH_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum SignalingMode {
    /// Hosted WebSocket relay
    Relay,
    /// Same-process loopback self-test
    Loopback,
    /// Copy-paste payload exchange
    Manual,
}

/// Data channel mode CLI argument wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum DataChannelModeArg {
    Reliable,
    Unreliable,
}

impl From<DataChannelModeArg> for DataChannelMode {
    fn from(arg: DataChannelModeArg) -> Self {
        match arg {
            DataChannelModeArg::Reliable => DataChannelMode::Reliable,
            DataChannelModeArg::Unreliable => DataChannelMode::Unreliable,
        }
    }
}

/// Parse TURN server string (format: turn:host:port:username:password or turns:host:port:username:password)
fn parse_turn_server(s: &str) -> anyhow::Result<IceServerConfig> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 5 {
        anyhow::bail!(
            "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
            s
        );
    }

    let protocol = parts[0];
    if protocol != "turn" && protocol != "turns" {
        anyhow::bail!(
            "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
            protocol
        );
    }

    // Password may contain colons, so join remaining parts
    Ok(IceServerConfig::turn(
        format!("{}:{}:{}", protocol, parts[1], parts[2]),
        parts[3],
        parts[4..].join(":"),
    ))
}

fn build_config_from_args(args: &Args) -> anyhow::Result<MeshConfig> {
    let mut ice_servers: Vec<IceServerConfig> = args
        .stun_servers
        .iter()
        .map(|url| IceServerConfig::stun(url.as_str()))
        .collect();

    for turn in &args.turn_servers {
        let server = parse_turn_server(turn)?;
        info!("Adding TURN server: {:?} (user: {})", server.urls, server.username);
        ice_servers.push(server);
    }

    let config = MeshConfig::default()
        .with_framing(args.framing)
        .with_channel_name(&args.channel_name)
        .with_ice_servers(ice_servers)
        .with_max_message_size_for_frame(args.max_frame_bytes)
        .with_frames_timeout_ms(args.frames_timeout_ms)
        .with_data_channel_mode(args.data_channel_mode.into());

    config.validate().context("Invalid mesh configuration")?;
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,webrtc=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = build_config_from_args(&args)?;
    let pool = ConnectionPool::new(Arc::new(WebRtcSessionFactory::new()), config)?;

    pool.on_open(|| info!("Data channel open"));
    pool.on_close(|| warn!("Peer connection lost"));
    pool.on_message(|peer_id, message| println!("[{}] {}", peer_id, message));

    let mut manual: Option<Arc<ManualSignaling>> = None;

    match args.mode {
        SignalingMode::Relay => {
            let signaling = Arc::new(RelaySignaling::new(&args.relay_url, &args.room)?);
            signaling.bind_connection_error(Arc::new(|peer_id: String| {
                warn!("Connection to {} failed", peer_id)
            }));
            pool.connect(signaling)
                .await
                .with_context(|| format!("Failed to join relay {}", args.relay_url))?;
        }
        SignalingMode::Loopback => {
            let signaling = Arc::new(LocalSignaling::new());
            signaling.bind_connection_error(Arc::new(|peer_id: String| {
                warn!("Loopback connection {} failed", peer_id)
            }));
            let dyn_signaling: Arc<dyn Signaling> = signaling.clone();
            pool.connect(dyn_signaling).await?;
            signaling.initiate(args.connections);
        }
        SignalingMode::Manual => {
            let signaling = Arc::new(ManualSignaling::new());
            signaling.bind_outgoing_text(Arc::new(|text: String| {
                println!("--- send this to the other side ---\n{}\n---", text)
            }));
            let dyn_signaling: Arc<dyn Signaling> = signaling.clone();
            pool.connect(dyn_signaling).await?;
            info!("Type /offer to start, paste the other side's JSON to answer");
            manual = Some(signaling);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if let Some(signaling) = &manual {
                    if line == "/offer" {
                        signaling.initiate();
                        continue;
                    }
                    if line.starts_with('{') {
                        if let Err(e) = signaling.apply_remote_text(line) {
                            warn!("Could not apply pasted payload: {}", e);
                        }
                        continue;
                    }
                }

                let report = pool.send_message(line).await?;
                if !report.all_sent() {
                    warn!("Message not delivered to {:?}", report.failed_peers);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    pool.close().await;
    Ok(())
}
