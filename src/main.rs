use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use clap::{Parser, ValueEnum};
use echo_rust::calls::{AutoAnswer, CallDecision, ChannelPrompt, IncomingCallPrompt, PendingDecision};
use echo_rust::config::{ClientConfig, DEFAULT_RELAY_URL, DEFAULT_STORE_PATH};
use echo_rust::media::{MediaConfig, MediaEvent, MediaSession, MediaSessionFactory};
use echo_rust::types::events::Event;
use echo_rust::{EchoClient, Token};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};

// A command-line calling client.
//
// Usage:
//   cargo run -- --token <jwt>                     # Log in and wait for calls
//   cargo run                                      # Resume the stored session
//   cargo run -- --call bob                        # Call a peer right away
//   cargo run -- --answer accept                   # Pick up every incoming call

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer calling client", long_about = None)]
struct Args {
    /// Signaling relay WebSocket URL
    #[arg(long, default_value = DEFAULT_RELAY_URL, env = "ECHO_RELAY_URL")]
    relay: String,

    /// Directory for persisted client state
    #[arg(long, default_value = DEFAULT_STORE_PATH, env = "ECHO_STORE")]
    store: String,

    /// Bearer token to log in with; otherwise the stored token is used
    #[arg(long, env = "ECHO_TOKEN")]
    token: Option<String>,

    /// Shared HS256 secret used to verify tokens
    #[arg(long, env = "ECHO_TOKEN_SECRET")]
    secret: Option<String>,

    /// Peer id to call once logged in
    #[arg(long)]
    call: Option<String>,

    /// How incoming calls are answered
    #[arg(long, value_enum, default_value_t = AnswerMode::Ask)]
    answer: AnswerMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum AnswerMode {
    /// Ask on stdin
    Ask,
    Accept,
    Reject,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        if let Err(e) = run(args).await {
            error!("{:#}", e);
        }
    });
}

async fn run(args: Args) -> Result<()> {
    let config = ClientConfig {
        relay_url: args.relay,
        store_path: args.store,
        token_secret: args.secret,
        ..Default::default()
    };

    let prompt: Arc<dyn IncomingCallPrompt> = match args.answer {
        AnswerMode::Ask => {
            let (prompt, requests) = ChannelPrompt::new();
            tokio::spawn(answer_from_stdin(requests));
            Arc::new(prompt)
        }
        AnswerMode::Accept => Arc::new(AutoAnswer(CallDecision::Accept)),
        AnswerMode::Reject => Arc::new(AutoAnswer(CallDecision::Reject)),
    };

    let client = EchoClient::builder()
        .with_config(config)
        .with_media(LoggingMediaFactory)
        .with_prompt(prompt)
        .on_event(|event, _client| async move {
            match event {
                Event::IdentityAvailable(identity) => {
                    info!("Logged in as {} ({})", identity.name, identity.id)
                }
                Event::LoginFailed { reason } => error!("Login failed: {}", reason),
                Event::IncomingCall { caller } => info!("Incoming call from {}", caller),
                Event::BusyRejected { caller } => info!("Busy; rejected call from {}", caller),
                Event::CallConnected { peer, room } => {
                    info!("Call with {} connected (room {})", peer, room)
                }
                Event::MediaJoined { room, .. } => info!("Media joined room {}", room),
                Event::CallEnded { peer, reason } => {
                    info!("Call with {} ended: {:?}", peer, reason)
                }
                Event::LoggedOut => info!("Logged out"),
            }
        })
        .build()
        .await?;

    match args.token {
        Some(token) => {
            client.login(Token::new(token)).await?;
        }
        None => {
            if client.restore_session().await?.is_none() {
                warn!("No stored token; pass --token to log in");
            }
        }
    }

    if let Some(peer) = args.call {
        client.call(&peer).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.disconnect().await;
    Ok(())
}

async fn answer_from_stdin(mut requests: mpsc::UnboundedReceiver<PendingDecision>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(pending) = requests.recv().await {
        let question = format!("Accept call from {}? [y/N] ", pending.caller_id());
        if stdout.write_all(question.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            pending.reject();
            continue;
        }

        match lines.next_line().await {
            Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y") => pending.accept(),
            Ok(Some(_)) => pending.reject(),
            Ok(None) | Err(_) => {
                warn!("stdin closed; rejecting further calls");
                pending.reject();
                break;
            }
        }
    }
}

/// Stand-in media collaborator: ready immediately, logs what it is asked to do.
struct LoggingMediaFactory;

struct LoggingMediaSession {
    events: Mutex<Option<mpsc::Sender<MediaEvent>>>,
}

#[async_trait]
impl MediaSessionFactory for LoggingMediaFactory {
    async fn create_session(
        &self,
        config: &MediaConfig,
    ) -> Result<(Arc<dyn MediaSession>, mpsc::Receiver<MediaEvent>), anyhow::Error> {
        info!(
            "Media session created (local: {}, remotes: {}, auto request: {})",
            config.local_video_el, config.remote_videos_el, config.auto_request_media
        );
        let (tx, rx) = mpsc::channel(4);
        tx.send(MediaEvent::ReadyToCall).await?;
        let session = LoggingMediaSession {
            events: Mutex::new(Some(tx)),
        };
        Ok((Arc::new(session), rx))
    }
}

#[async_trait]
impl MediaSession for LoggingMediaSession {
    async fn join_room(&self, room: &str) -> Result<(), anyhow::Error> {
        info!("Media session joined room {}", room);
        Ok(())
    }

    async fn disconnect(&self) {
        // Closing the sender ends the coordinator's event loop.
        self.events.lock().await.take();
        info!("Media session disconnected");
    }
}
