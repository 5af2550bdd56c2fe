use std::collections::HashSet;
use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tgdash::api::{self, AppState};
use tgdash::config::{APP_NAME, AppConfig};
use tgdash::console::Console;
use tgdash::credentials::{BotCredential, CredentialRegistry};
use tgdash::hub::BroadcastHub;
use tgdash::protocol::{BroadcastEvent, NormalizedMessage};
use tgdash::push::PushSubscriber;
use tgdash::storage::{FileKeyValueStore, KeyValueStore};
use tgdash::store::{MessageStore, SystemClock};
use tgdash::telegram::{ChatTarget, TelegramClient};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, command: Command) -> Result<()> {
    match command {
        Command::Serve(cmd) => handle_serve(&ctx, cmd).await,
        Command::Watch(cmd) => handle_watch(&ctx, cmd).await,
        command => {
            let console = open_console(&ctx).await?;
            let result = handle_console(&ctx, &console, command).await;
            console.store().flush().await;
            result
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
        command => async_main(ctx, command),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "tgdash - Telegram bot console with real-time webhook fan-out.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging (equivalent to -vv)
    #[arg(long, global = true)]
    debug: bool,
    /// Enable trace logging (overrides other levels)
    #[arg(long, global = true)]
    trace: bool,
    /// Output machine readable JSON
    #[arg(long, global = true, conflicts_with = "yaml")]
    json: bool,
    /// Output machine readable YAML
    #[arg(long, global = true)]
    yaml: bool,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    no_color: bool,
    /// Control color output (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
    /// Do not change anything on disk
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,
    /// Assume "yes" for interactive prompts
    #[arg(short = 'y', long = "yes", global = true)]
    assume_yes: bool,
    /// Seconds to wait for each Telegram API call
    #[arg(long = "timeout", value_name = "SECONDS", global = true)]
    timeout: Option<u64>,
    /// Emit additional diagnostics for troubleshooting
    #[arg(long = "diagnostics", global = true)]
    diagnostics: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the webhook and push server
    Serve(ServeCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Manage registered bots
    Bot {
        #[command(subcommand)]
        command: BotCommand,
    },
    /// Manage a bot's webhook
    Webhook {
        #[command(subcommand)]
        command: WebhookCommand,
    },
    /// Send a text message
    Send(SendCommand),
    /// Edit the text of a sent message
    Edit(EditCommand),
    /// Delete a message
    Delete(DeleteCommand),
    /// Pull pending updates for a bot (only while no webhook is set)
    Poll(PollCommand),
    /// Follow a server's push channel and record incoming messages
    Watch(WatchCommand),
    /// Inspect the local message log
    Messages {
        #[command(subcommand)]
        command: MessagesCommand,
    },
    /// Show chat details
    Chat(ChatCommand),
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,
    /// Enable development endpoints and permissive CORS
    #[arg(long)]
    dev: bool,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Subcommand)]
enum BotCommand {
    /// Register a bot token (validated with getMe)
    Add {
        token: String,
        /// Name to show when the bot has no username
        #[arg(short, long)]
        label: Option<String>,
    },
    /// List registered bots
    List,
    /// Unregister a bot and drop its messages
    Remove { bot: String },
    /// Re-fetch bot details from Telegram
    Refresh { bot: String },
}

#[derive(Debug, Subcommand)]
enum WebhookCommand {
    /// Point the bot's webhook at this server
    Set {
        bot: String,
        /// Public base URL of the server (defaults to server.public_url)
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove the bot's webhook
    Delete {
        bot: String,
        /// Discard updates queued on Telegram's side
        #[arg(long)]
        drop_pending: bool,
    },
    /// Show the bot's webhook status
    Info { bot: String },
}

#[derive(Debug, Clone, Args)]
struct SendCommand {
    bot: String,
    /// Numeric chat id or @channel username
    #[arg(allow_hyphen_values = true)]
    chat: ChatTarget,
    text: String,
}

#[derive(Debug, Clone, Args)]
struct EditCommand {
    bot: String,
    #[arg(allow_hyphen_values = true)]
    chat: ChatTarget,
    message_id: i64,
    text: String,
}

#[derive(Debug, Clone, Args)]
struct DeleteCommand {
    bot: String,
    #[arg(allow_hyphen_values = true)]
    chat: ChatTarget,
    message_id: i64,
}

#[derive(Debug, Clone, Args)]
struct PollCommand {
    bot: String,
    /// Maximum number of updates to fetch
    #[arg(long)]
    limit: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct WatchCommand {
    /// Server base URL (defaults to the configured server address)
    #[arg(long)]
    server: Option<String>,
    /// Stable connection id; reconnecting with it replaces the old stream
    #[arg(long)]
    connection_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum MessagesCommand {
    /// List stored messages, newest first
    List {
        /// Only messages received through this bot
        #[arg(long)]
        bot: Option<String>,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Clear stored messages (all, or only those of the given bots)
    Clear {
        #[arg(long = "bot")]
        bots: Vec<String>,
    },
}

#[derive(Debug, Clone, Args)]
struct ChatCommand {
    bot: String,
    #[arg(allow_hyphen_values = true)]
    chat: ChatTarget,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let mut paths = AppPaths::discover(common.config.clone())?;
        let mut config = load_or_init_config(&mut paths, &common)?;
        if let Some(timeout) = common.timeout {
            config.telegram.timeout_secs = timeout;
        }
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }

        let level = match self.effective_log_level() {
            LevelFilter::Off => "off",
            LevelFilter::Error => "error",
            LevelFilter::Warn => "warn",
            LevelFilter::Info => "info",
            LevelFilter::Debug => "debug",
            LevelFilter::Trace => "trace",
        };

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("tgdash={level},tower_http={level}")));

        if let Some(ref file) = self.config.logging.file {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .with_context(|| format!("opening log file {file}"))?;
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
                .ok();
        } else if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let force_color = matches!(self.common.color, ColorOption::Always)
                || env::var_os("FORCE_COLOR").is_some();
            let disable_color = self.common.no_color
                || matches!(self.common.color, ColorOption::Never)
                || env::var_os("NO_COLOR").is_some()
                || (!force_color && !io::stderr().is_terminal());

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color)
                        .with_target(self.common.diagnostics)
                        .with_file(self.common.diagnostics)
                        .with_line_number(self.common.diagnostics),
                )
                .try_init()
                .ok();
        }

        // Also init env_logger for compatibility with log crate users
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder.filter_level(self.effective_log_level());
        builder.try_init().ok();

        Ok(())
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => self
                    .config
                    .logging
                    .level
                    .parse()
                    .unwrap_or(LevelFilter::Info),
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            info!(
                "dry-run: would ensure data dir {}",
                self.paths.data_dir.display()
            );
            return Ok(());
        }

        fs::create_dir_all(&self.paths.data_dir).with_context(|| {
            format!("creating data directory {}", self.paths.data_dir.display())
        })?;
        Ok(())
    }

    /// Print `value` as JSON/YAML when requested, otherwise the human form.
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        let output = if self.common.json {
            serde_json::to_string_pretty(value).context("serializing output to JSON")?
        } else if self.common.yaml {
            serde_yaml::to_string(value).context("serializing output to YAML")?
        } else {
            human()
        };
        println!("{output}");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        Ok(self)
    }

    /// Directory of the client key-value store.
    fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}",
            self.config_file.display(),
            self.data_dir.display()
        )
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    if ctx.paths.config_file.exists() && !(cmd.force || ctx.common.assume_yes) {
        return Err(anyhow!(
            "config already exists at {} (use --force to overwrite)",
            ctx.paths.config_file.display()
        ));
    }

    if ctx.common.dry_run {
        info!(
            "dry-run: would write default config to {}",
            ctx.paths.config_file.display()
        );
        return Ok(());
    }

    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => ctx.emit(&ctx.config, || format!("{:#?}", ctx.config)),
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut server = ctx.config.server.clone();
    if let Some(host) = cmd.host {
        server.host = host;
    }
    if let Some(port) = cmd.port {
        server.port = port;
    }
    server.dev_mode |= cmd.dev;

    info!(
        "Starting tgdash server ({} mode)",
        if server.dev_mode {
            "development"
        } else {
            "production"
        }
    );

    let hub = Arc::new(BroadcastHub::new());
    let shutdown = CancellationToken::new();
    let heartbeat = hub.spawn_heartbeat(server.heartbeat_interval(), shutdown.clone());

    let app = api::create_router(AppState::new(hub.clone(), &server));

    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .context("invalid address")?;
    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;
    info!("Listening on http://{}", addr);
    info!("Webhook endpoint: {}/api/webhook/<bot id>", server.base_url());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("running server")?;

    shutdown.cancel();
    if let Err(err) = heartbeat.await {
        warn!("Heartbeat task ended abnormally: {}", err);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}

async fn open_console(ctx: &RuntimeContext) -> Result<Console> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(ctx.paths.store_dir()));
    let registry = Arc::new(CredentialRegistry::load(kv.clone()).await);
    let store = Arc::new(
        MessageStore::open(
            kv,
            registry.clone(),
            Arc::new(SystemClock),
            ctx.config.store.options(),
        )
        .await,
    );
    let telegram = TelegramClient::new(
        ctx.config.telegram.api_base_url.clone(),
        ctx.config.telegram.timeout(),
    )
    .context("creating Telegram client")?;
    Ok(Console::new(registry, telegram, store))
}

async fn handle_console(ctx: &RuntimeContext, console: &Console, command: Command) -> Result<()> {
    match command {
        Command::Bot { command } => handle_bot(ctx, console, command).await,
        Command::Webhook { command } => handle_webhook(ctx, console, command).await,
        Command::Send(cmd) => {
            let sent = console
                .send_message(&cmd.bot, &cmd.chat, &cmd.text)
                .await
                .context("sending message")?;
            ctx.emit(&sent, || format!("Sent message {}", sent.message_id))
        }
        Command::Edit(cmd) => {
            let edited = console
                .edit_message(&cmd.bot, &cmd.chat, cmd.message_id, &cmd.text)
                .await
                .context("editing message")?;
            ctx.emit(&edited, || format!("Edited message {}", edited.message_id))
        }
        Command::Delete(cmd) => {
            let deleted = console
                .delete_message(&cmd.bot, &cmd.chat, cmd.message_id)
                .await
                .context("deleting message")?;
            ctx.emit(&deleted, || {
                if deleted {
                    format!("Deleted message {}", cmd.message_id)
                } else {
                    format!("Message {} was not deleted", cmd.message_id)
                }
            })
        }
        Command::Poll(cmd) => {
            let messages = console
                .poll(&cmd.bot, cmd.limit)
                .await
                .context("polling updates")?;
            ctx.emit(&messages, || render_messages(&messages))
        }
        Command::Messages { command } => handle_messages(ctx, console, command),
        Command::Chat(cmd) => {
            let chat = console
                .chat_info(&cmd.bot, &cmd.chat)
                .await
                .context("fetching chat")?;
            ctx.emit(&chat, || {
                let name = chat
                    .title
                    .clone()
                    .or_else(|| chat.username.as_ref().map(|u| format!("@{u}")))
                    .or_else(|| chat.first_name.clone())
                    .unwrap_or_default();
                format!("{} ({:?}) {}", chat.id, chat.kind, name)
            })
        }
        Command::Serve(_)
        | Command::Watch(_)
        | Command::Init(_)
        | Command::Config { .. }
        | Command::Completions { .. } => Err(anyhow!("not a console command")),
    }
}

/// Bot listing without the secret part of the token.
#[derive(Debug, Serialize)]
struct BotSummary {
    id: String,
    name: Option<String>,
    token: String,
    added_at: DateTime<Utc>,
}

impl From<&BotCredential> for BotSummary {
    fn from(bot: &BotCredential) -> Self {
        Self {
            id: bot.id.clone(),
            name: bot.display_name(),
            token: bot.masked_token(),
            added_at: bot.added_at,
        }
    }
}

async fn handle_bot(ctx: &RuntimeContext, console: &Console, command: BotCommand) -> Result<()> {
    match command {
        BotCommand::Add { token, label } => {
            let bot = console.add_bot(&token, label).await.context("adding bot")?;
            let summary = BotSummary::from(&bot);
            ctx.emit(&summary, || {
                format!(
                    "Added bot {} ({})",
                    summary.id,
                    summary.name.as_deref().unwrap_or("unnamed")
                )
            })
        }
        BotCommand::List => {
            let bots: Vec<BotSummary> = console
                .registry()
                .list()
                .iter()
                .map(BotSummary::from)
                .collect();
            ctx.emit(&bots, || {
                if bots.is_empty() {
                    return "No bots registered".to_string();
                }
                bots.iter()
                    .map(|b| {
                        format!(
                            "{:<12} {:<24} {}",
                            b.id,
                            b.name.as_deref().unwrap_or("-"),
                            b.token
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        BotCommand::Remove { bot } => {
            let removed = console.remove_bot(&bot).await.context("removing bot")?;
            let summary = BotSummary::from(&removed);
            ctx.emit(&summary, || format!("Removed bot {}", summary.id))
        }
        BotCommand::Refresh { bot } => {
            let refreshed = console.refresh_bot(&bot).await.context("refreshing bot")?;
            let summary = BotSummary::from(&refreshed);
            ctx.emit(&summary, || {
                format!(
                    "Refreshed bot {} ({})",
                    summary.id,
                    summary.name.as_deref().unwrap_or("unnamed")
                )
            })
        }
    }
}

async fn handle_webhook(
    ctx: &RuntimeContext,
    console: &Console,
    command: WebhookCommand,
) -> Result<()> {
    match command {
        WebhookCommand::Set { bot, url } => {
            let base = url.unwrap_or_else(|| ctx.config.server.base_url());
            let registered = console
                .set_webhook(&bot, &base)
                .await
                .context("setting webhook")?;
            ctx.emit(&registered, || format!("Webhook set to {registered}"))
        }
        WebhookCommand::Delete { bot, drop_pending } => {
            let deleted = console
                .delete_webhook(&bot, drop_pending)
                .await
                .context("deleting webhook")?;
            ctx.emit(&deleted, || "Webhook deleted".to_string())
        }
        WebhookCommand::Info { bot } => {
            let info = console
                .webhook_info(&bot)
                .await
                .context("fetching webhook info")?;
            ctx.emit(&info, || {
                let mut out = if info.url.is_empty() {
                    "No webhook set".to_string()
                } else {
                    format!("{} ({} pending)", info.url, info.pending_update_count)
                };
                if let Some(ref error) = info.last_error_message {
                    out.push_str(&format!("\nLast error: {error}"));
                }
                out
            })
        }
    }
}

fn handle_messages(ctx: &RuntimeContext, console: &Console, command: MessagesCommand) -> Result<()> {
    match command {
        MessagesCommand::List { bot, limit } => {
            let bot_id = match bot {
                Some(reference) => Some(console.bot(&reference)?.id),
                None => None,
            };
            let messages: Vec<NormalizedMessage> = console
                .store()
                .messages()
                .into_iter()
                .filter(|m| bot_id.is_none() || m.source_token_id == bot_id)
                .take(limit)
                .collect();
            ctx.emit(&messages, || render_messages(&messages))
        }
        MessagesCommand::Clear { bots } => {
            if bots.is_empty() {
                console.store().clear(None);
            } else {
                let ids = bots
                    .iter()
                    .map(|b| console.bot(b).map(|bot| bot.id))
                    .collect::<Result<HashSet<String>, _>>()?;
                console.store().clear(Some(&ids));
            }
            let remaining = console.store().len();
            ctx.emit(&remaining, || format!("{remaining} messages left"))
        }
    }
}

async fn handle_watch(ctx: &RuntimeContext, cmd: WatchCommand) -> Result<()> {
    let console = open_console(ctx).await?;
    let server = cmd
        .server
        .unwrap_or_else(|| ctx.config.server.base_url());
    let subscriber = PushSubscriber::new(server, cmd.connection_id);
    info!("Watching {}", subscriber.events_url());

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    let json = ctx.common.json;
    let result = subscriber
        .run(cancel, |event| {
            if !console.apply_event(&event) {
                debug!("Ignoring {} event", event.kind());
                return;
            }
            if let BroadcastEvent::NewMessage(payload) = &event {
                if json {
                    if let Ok(line) = serde_json::to_string(&payload.message) {
                        println!("{line}");
                    }
                } else {
                    println!("{}", render_message(&payload.message));
                }
            }
        })
        .await;

    console.store().flush().await;
    result.context("watching push channel")
}

fn render_messages(messages: &[NormalizedMessage]) -> String {
    if messages.is_empty() {
        return "No messages".to_string();
    }
    messages
        .iter()
        .map(render_message)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_message(message: &NormalizedMessage) -> String {
    let when = Utc
        .timestamp_opt(message.date, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| message.date.to_string());
    let sender = message
        .from
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or_else(|| "-".to_string());
    let via = message
        .bot_username
        .as_deref()
        .or(message.source_token_id.as_deref())
        .unwrap_or("-");
    let edited = if message.is_edited() { " (edited)" } else { "" };
    format!(
        "{when} [{via}] {chat} #{id} {sender}: {text}{edited}",
        chat = message.chat.label(),
        id = message.message_id,
        text = message.summary(),
    )
}

fn load_or_init_config(paths: &mut AppPaths, common: &CommonOpts) -> Result<AppConfig> {
    if !paths.config_file.exists() {
        if common.dry_run {
            info!(
                "dry-run: would create default config at {}",
                paths.config_file.display()
            );
        } else {
            write_default_config(&paths.config_file)?;
        }
    }

    let mut config =
        AppConfig::load(&paths.config_file).context("loading configuration")?;

    if let Some(ref file) = config.logging.file {
        let expanded = expand_str_path(file)?;
        config.logging.file = Some(expanded.display().to_string());
    }

    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    let mut buffer = String::new();
    buffer.push_str("# Configuration for ");
    buffer.push_str(APP_NAME);
    buffer.push('\n');
    buffer.push_str("# File: ");
    buffer.push_str(&path.display().to_string());
    buffer.push('\n');
    buffer.push_str("# Environment overrides: TGDASH__<SECTION>__<KEY>\n");
    buffer.push('\n');
    buffer
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}
