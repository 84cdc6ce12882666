use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sonic_bridge::config::BridgeConfig;
use sonic_bridge::core::realtime::transport::websocket::WebSocketConnector;
use sonic_bridge::core::realtime::{
    PipeError, PlaybackSink, SessionOutput, StreamSession, TransportConnector, TransportKind,
};
use sonic_bridge::core::{WavPlaybackSink, stream_wav_file};

/// Sonic Bridge - Bidirectional speech-to-speech session runner
#[derive(Parser, Debug)]
#[command(name = "sonic-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// WAV file (16kHz mono PCM16) streamed as microphone input
    #[arg(short = 'i', long = "input", value_name = "WAV")]
    input: Option<PathBuf>,

    /// WAV file receiving synthesized audio
    #[arg(short = 'o', long = "output", value_name = "WAV")]
    output: Option<PathBuf>,

    /// Transport to use (bedrock or websocket)
    #[arg(short = 't', long = "transport")]
    transport: Option<String>,

    /// WebSocket endpoint for the websocket transport
    #[arg(long = "ws-url")]
    ws_url: Option<String>,

    /// AWS region
    #[arg(long = "region")]
    region: Option<String>,

    /// Bedrock model id
    #[arg(long = "model-id")]
    model_id: Option<String>,
}

/// Sink used when no output file is given; keeps the egress pipe drained.
struct DiscardSink;

#[async_trait]
impl PlaybackSink for DiscardSink {
    async fn play(&mut self, chunk: Bytes) -> Result<(), PipeError> {
        debug!("Discarding {} bytes of synthesized audio", chunk.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
    }
    let mut config =
        BridgeConfig::load(cli.config.as_deref()).map_err(|e| anyhow!(e.to_string()))?;
    apply_cli_overrides(&mut config, &cli)?;
    config.validate().map_err(|e| anyhow!(e.to_string()))?;

    // Initialize tracing; RUST_LOG takes precedence over --debug
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let connector = build_connector(&config)?;
    info!(
        "Using {} transport (model {}, region {})",
        connector.name(),
        config.model_id,
        config.region
    );

    let session = Arc::new(StreamSession::new(config.to_session_config(), connector));

    let stopped = CancellationToken::new();
    let printer = spawn_output_printer(&session, stopped.clone())?;

    session
        .initialize()
        .await
        .map_err(|e| anyhow!("Failed to initialize session: {}", e))?;
    session
        .start_audio_content()
        .await
        .map_err(|e| anyhow!("Failed to start audio content: {}", e))?;

    // Playback
    let playback_cancel = CancellationToken::new();
    let playback = match &cli.output {
        Some(path) => {
            let sink = WavPlaybackSink::create(path, &session.config().output_audio)
                .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;
            info!("Writing synthesized audio to {}", path.display());
            session.spawn_playback(sink, playback_cancel.clone())?
        }
        None => session.spawn_playback(DiscardSink, playback_cancel.clone())?,
    };

    // Capture
    let capture_cancel = CancellationToken::new();
    let capture = cli.input.clone().map(|path| {
        let session = session.clone();
        let cancel = capture_cancel.clone();
        let chunk_size = config.chunk_size;
        tokio::spawn(async move {
            match stream_wav_file(&session, &path, chunk_size, cancel).await {
                Ok(sent) => info!("Finished streaming {} ({} chunks)", path.display(), sent),
                Err(e) => error!("Failed to stream {}: {}", path.display(), e),
            }
        })
    });

    println!("Session active. Press Enter to stop...");
    tokio::select! {
        _ = wait_for_enter() => info!("Stop requested"),
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = stopped.cancelled() => warn!("Session stopped"),
    }

    capture_cancel.cancel();
    if let Some(handle) = capture
        && let Err(e) = handle.await
    {
        warn!("Capture task failed: {}", e);
    }

    if let Err(e) = session.close().await {
        error!("Failed to close session: {}", e);
    }

    playback_cancel.cancel();
    match playback.await {
        Ok(stats) => info!(
            "Playback finished: {} chunks played, {} dropped on barge-in",
            stats.played, stats.dropped
        ),
        Err(e) => warn!("Playback task failed: {}", e),
    }

    printer.abort();
    Ok(())
}

/// Resolves when a line is read from stdin.
///
/// Reads on a detached thread so a pending read never holds up runtime
/// shutdown.
async fn wait_for_enter() {
    let (tx, rx) = oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = tx.send(());
    });
    let _ = rx.await;
}

fn apply_cli_overrides(config: &mut BridgeConfig, cli: &Cli) -> anyhow::Result<()> {
    if cli.debug {
        config.debug = true;
    }
    if let Some(kind) = &cli.transport {
        config.transport =
            TransportKind::parse(kind).ok_or_else(|| anyhow!("Unknown transport '{}'", kind))?;
    }
    if let Some(url) = &cli.ws_url {
        config.ws_url = Some(url.clone());
    }
    if let Some(region) = &cli.region {
        config.region = region.clone();
    }
    if let Some(model_id) = &cli.model_id {
        config.model_id = model_id.clone();
    }
    Ok(())
}

fn build_connector(config: &BridgeConfig) -> anyhow::Result<Arc<dyn TransportConnector>> {
    match config.transport {
        TransportKind::WebSocket => {
            let url = config
                .ws_url
                .as_deref()
                .ok_or_else(|| anyhow!("The websocket transport requires --ws-url"))?;
            Ok(Arc::new(WebSocketConnector::new(url)?))
        }
        #[cfg(feature = "bedrock")]
        TransportKind::Bedrock => {
            use sonic_bridge::core::realtime::transport::bedrock::{
                BedrockConnector, BedrockSettings,
            };
            Ok(Arc::new(BedrockConnector::new(BedrockSettings {
                region: config.region.clone(),
                model_id: config.model_id.clone(),
                aws_access_key_id: config.aws_access_key_id.clone(),
                aws_secret_access_key: config.aws_secret_access_key.clone(),
                aws_session_token: config.aws_session_token.clone(),
            })))
        }
        #[cfg(not(feature = "bedrock"))]
        TransportKind::Bedrock => Err(anyhow!(
            "The bedrock transport requires building with --features bedrock"
        )),
    }
}

fn spawn_output_printer(
    session: &StreamSession,
    stopped: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let mut output = session
        .take_output_receiver()
        .ok_or_else(|| anyhow!("Output receiver already taken"))?;

    Ok(tokio::spawn(async move {
        while let Some(event) = output.recv().await {
            match event {
                SessionOutput::Transcript { role, text } => println!("{}: {}", role, text),
                SessionOutput::Event(value) => {
                    debug!("Event: {}", value);
                }
                SessionOutput::Raw(text) => warn!("Unparsed message: {}", text),
                SessionOutput::Stopped { reason } => {
                    info!("Response stream stopped: {}", reason);
                    stopped.cancel();
                }
            }
        }
    }))
}
