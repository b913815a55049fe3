use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use duplex_voice::core::transport::live::client_content;
use duplex_voice::{
    EngineConfig, Event, EventKind, HttpCredentialBroker, LiveTransport, SessionController,
    SessionState, Speaker, TransportKind,
};

/// Duplex voice - realtime voice sessions from the terminal
#[derive(Parser, Debug)]
#[command(name = "duplex-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a live session; stdin lines are sent as user text turns
    Talk,

    /// Print the resolved configuration with secrets redacted
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path)?
    } else {
        EngineConfig::from_env()?
    };

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", config.redacted());
            Ok(())
        }
        Commands::Talk => talk(config).await,
    }
}

async fn talk(config: EngineConfig) -> anyhow::Result<()> {
    if config.transport != TransportKind::NativeLive {
        anyhow::bail!(
            "The '{}' transport needs a platform peer connection and is only available through the library API",
            config.transport
        );
    }

    let mut broker = HttpCredentialBroker::new(config.credential_url.clone());
    if let Some(token) = &config.credential_auth_token {
        broker = broker.with_auth_token(token.clone());
    }
    let transport = LiveTransport::new(config.live_url.clone());

    let controller = SessionController::with_labels(
        config.session.clone(),
        Arc::new(broker),
        Arc::new(transport),
        config.labels.clone(),
    );

    let labels = config.labels.clone();
    let last_speaker = Arc::new(parking_lot::Mutex::new(None::<Speaker>));
    controller.on(EventKind::TranscriptDelta, move |event| {
        if let Event::TranscriptDelta { speaker, text } = event {
            let mut last = last_speaker.lock();
            if *last != Some(*speaker) {
                print!("\n{}: ", labels.label(*speaker));
                *last = Some(*speaker);
            }
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
    });
    controller.on(EventKind::Error, |event| {
        if let Event::Error { detail } = event {
            eprintln!("\n[error] {detail}");
        }
    });

    let mut state_rx = controller.subscribe_state();
    controller.start().await?;
    info!("Session {:?} started; type to talk, Ctrl-D to finish", controller.session_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    controller.send(client_content(&line, true))?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() || !state_rx.borrow().is_active() {
                    break;
                }
            }
        }
    }

    let failed = controller.state() == SessionState::Error;
    controller.stop();
    if failed {
        eprintln!("Session ended with an error");
    }

    let conversation = controller.conversation_text();
    if !conversation.is_empty() {
        println!("\n\n=== Conversation ===\n{conversation}");
    }
    Ok(())
}
