//! Weaver CLI
//!
//! Command-line interface for page resolution, session linking, the local
//! session cache, and replaying recorded page captures against a backend.
//! Prints JSON on stdout; logs go to stderr.

use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use weaver_lib::{
    logging, resolve_page, Activation, BackendClient, CapturePipeline, Coordinator, JsonFileStore, PageEvent,
    PageIdentity, PageNode, SessionBackend, SessionCache, SessionKey, SessionRecord, SessionFlow,
    UploadCoordinator, UploadResult, WeaverConfig,
};

/// Capacity of the page-event and message channels
const CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "weaver")]
#[command(about = "Weaver CLI - Mirror chat-page conversations into sessions", long_about = None)]
struct Cli {
    /// Config file (default: <data dir>/weaver/config/preferences.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL, overriding config and environment
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// More log output on stderr (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a page address to its service and conversation id
    Resolve {
        url: String,
    },
    /// Run the session flow for a page
    Activate {
        url: String,
        /// Recorded page events to capture when the page is linked to a
        /// session (the `existing` view); ignored for `new` and unsupported
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Session linking commands
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Local session cache commands
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Replay recorded page events through the capture pipeline
    Capture {
        /// Page address the events were recorded on
        url: String,
        /// JSON Lines file of page events
        events: PathBuf,
    },
    /// Check backend health
    Health,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a session for the page's conversation
    Create {
        url: String,
        /// Session name (1-50 characters)
        name: String,
    },
    /// Link the page's conversation to an existing session
    Continue {
        url: String,
        session_id: String,
    },
    /// List backend sessions
    List,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached session links
    List,
    /// Show one cached link by `service:conversationId`
    Get {
        key: String,
    },
    /// Move a cached link to another key
    Rekey {
        old: String,
        new: String,
    },
}

// ============ Replay Input ============

/// One line of a capture recording
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayEvent {
    Insert {
        node: PageNode,
        /// Wait before delivering, in milliseconds
        #[serde(default, rename = "delayMs")]
        delay_ms: u64,
    },
    Navigate {
        url: String,
        #[serde(default, rename = "delayMs")]
        delay_ms: u64,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveOutput {
    supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<PageIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_key: Option<String>,
}

#[derive(Serialize)]
struct CacheEntryOutput {
    key: String,
    record: SessionRecord,
}

#[derive(Serialize)]
struct RekeyOutput {
    moved: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureSummaryOutput {
    flushes: usize,
    turns: usize,
    promotions: usize,
    uploads: usize,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

struct App {
    config: WeaverConfig,
    backend: Arc<BackendClient>,
    cache: SessionCache,
}

impl App {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = WeaverConfig::load(cli.config.as_deref())?;
        if let Some(url) = &cli.backend_url {
            config.backend_url = url.clone();
        }
        let backend = BackendClient::with_timeouts(
            &config.backend_url,
            config.request_timeout(),
            config.connect_timeout(),
        )?;
        let cache = SessionCache::new(Arc::new(JsonFileStore::new(config.cache_path()?)));
        Ok(Self {
            config,
            backend: Arc::new(backend),
            cache,
        })
    }

    fn flow(&self) -> SessionFlow {
        SessionFlow::new(self.backend.clone(), self.cache.clone())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match App::load(&cli) {
        Ok(app) => run(app, cli.command).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            println!("{}", serde_json::to_string(&error).unwrap_or_default());
            std::process::exit(1);
        }
    }
}

async fn run(app: App, command: Commands) -> anyhow::Result<String> {
    match command {
        Commands::Resolve { url } => {
            let identity = resolve_page(&url, Utc::now());
            let output = ResolveOutput {
                supported: identity.is_some(),
                storage_key: identity.as_ref().map(|i| i.key().storage_key()),
                identity,
            };
            Ok(serde_json::to_string(&output)?)
        }
        Commands::Activate { url, events } => {
            let activation = app.flow().activate(&url, Utc::now()).await?;
            match (&activation, events) {
                // Linked pages go straight into capture
                (Activation::Existing(view), Some(events)) => {
                    println!("{}", serde_json::to_string(&activation)?);
                    handle_capture(&app, view.identity.clone(), &events).await
                }
                _ => Ok(serde_json::to_string(&activation)?),
            }
        }
        Commands::Session { action } => handle_session(&app, action).await,
        Commands::Cache { action } => handle_cache(&app, action).await,
        Commands::Capture { url, events } => {
            let identity = resolve_page(&url, Utc::now()).ok_or_else(|| anyhow!("Unsupported page: {}", url))?;
            handle_capture(&app, identity, &events).await
        }
        Commands::Health => Ok(serde_json::to_string(&app.backend.health().await?)?),
    }
}

// ============ Handlers ============

async fn handle_session(app: &App, action: SessionAction) -> anyhow::Result<String> {
    match action {
        SessionAction::Create { url, name } => {
            let mut flow = app.flow();
            match flow.activate(&url, Utc::now()).await? {
                Activation::Unsupported => bail!("Unsupported page: {}", url),
                Activation::Existing(view) => bail!(
                    "Conversation already linked to session {}",
                    view.record.session_id
                ),
                Activation::New(_) => Ok(serde_json::to_string(&flow.create(&name).await?)?),
            }
        }
        SessionAction::Continue { url, session_id } => {
            let mut flow = app.flow();
            match flow.activate(&url, Utc::now()).await? {
                Activation::Unsupported => bail!("Unsupported page: {}", url),
                Activation::Existing(view) => bail!(
                    "Conversation already linked to session {}",
                    view.record.session_id
                ),
                Activation::New(_) => Ok(serde_json::to_string(&flow.continue_with(&session_id).await?)?),
            }
        }
        SessionAction::List => Ok(serde_json::to_string(&app.backend.list_sessions().await?)?),
    }
}

fn parse_key(key: &str) -> anyhow::Result<SessionKey> {
    SessionKey::parse(key).ok_or_else(|| anyhow!("Invalid cache key (expected service:conversationId): {}", key))
}

async fn handle_cache(app: &App, action: CacheAction) -> anyhow::Result<String> {
    match action {
        CacheAction::List => {
            let items: Vec<CacheEntryOutput> = app
                .cache
                .list()
                .await?
                .into_iter()
                .map(|(key, record)| CacheEntryOutput { key, record })
                .collect();
            Ok(serde_json::to_string(&items)?)
        }
        CacheAction::Get { key } => {
            let key = parse_key(&key)?;
            let record = app
                .cache
                .get(&key)
                .await
                .ok_or_else(|| anyhow!("No cached session for {}", key))?;
            Ok(serde_json::to_string(&record)?)
        }
        CacheAction::Rekey { old, new } => {
            let (old, new) = (parse_key(&old)?, parse_key(&new)?);
            let moved = app.cache.rekey(&old, &new).await?;
            Ok(serde_json::to_string(&RekeyOutput { moved })?)
        }
    }
}

fn parse_events(content: &str, source: &str) -> anyhow::Result<Vec<ReplayEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).with_context(|| format!("{} line {}", source, i + 1)))
        .collect()
}

fn read_events(path: &Path) -> anyhow::Result<Vec<ReplayEvent>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    parse_events(&content, &path.display().to_string())
}

async fn handle_capture(app: &App, identity: PageIdentity, events: &Path) -> anyhow::Result<String> {
    let recorded = read_events(events)?;

    let backend: Arc<dyn SessionBackend> = app.backend.clone();
    let mut coordinator = Coordinator::new(UploadCoordinator::new(backend, app.cache.clone()));
    coordinator.set_active(identity.key());

    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let pipeline = CapturePipeline::new(identity, app.config.quiet_period(), message_tx);

    let capture = tokio::spawn(pipeline.run(event_rx));
    let coordination = tokio::spawn(coordinator.run(message_rx, |result: UploadResult| {
        println!("{}", serde_json::to_string(&result).unwrap_or_default());
    }));

    for event in recorded {
        let (event, delay_ms) = match event {
            ReplayEvent::Insert { node, delay_ms } => (PageEvent::Inserted(vec![node]), delay_ms),
            ReplayEvent::Navigate { url, delay_ms } => (PageEvent::Navigated(url), delay_ms),
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if event_tx.send(event).await.is_err() {
            break;
        }
    }
    drop(event_tx);

    let stats = capture.await??;
    let uploads = coordination.await?;
    Ok(serde_json::to_string(&CaptureSummaryOutput {
        flushes: stats.flushes,
        turns: stats.turns,
        promotions: stats.promotions,
        uploads,
    })?)
}
