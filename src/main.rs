use clap::Parser;
use remoted::config::{self, Config};
use remoted::demo::{self, DemoOptions};
use remoted::network::server::start_ws_server;
use remoted::network::session_registry::SessionRegistry;
use remoted::network::transport::WsTransport;
use remoted::shutdown::ShutdownManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Parser, Debug)]
#[command(name = "remoted")]
#[command(about = "Remote SDK control server for MPP phones", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "remoted.toml")]
    config: String,

    /// Bind address, optionally with a port (overrides server.listen_address)
    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Per-call response timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Log every request, response and ignored event
    #[arg(short, long)]
    debug: bool,

    /// Run the scripted two-phone call once enough phones are connected
    #[arg(long)]
    demo: bool,

    /// Phones to wait for before the demo starts
    #[arg(long)]
    peers: Option<usize>,

    /// Upload target for the demo's screenshot step (skipped when unset)
    #[arg(long)]
    screenshot_url: Option<String>,

    #[arg(long)]
    generate_config: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(addr) = &self.listen_addr {
            config.server.listen_address = addr.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.session.call_timeout_secs = timeout;
        }
        if let Some(peers) = self.peers {
            config.session.min_peers = peers;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    args.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("❌ Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let _log_guard = setup_logging(&config.logging);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let listen_addr = config.server.full_listen_address();

    println!("\n🚀 remoted v{} ({})", version, git_hash);
    println!("═══════════════════════════════════════════════════════");
    println!("✓ Loaded configuration from {}", args.config);
    println!("  └─ Control Server URL: ws://<this-host>:{}/", config.server.port);
    println!("  └─ Call timeout: {}s", config.session.call_timeout_secs);
    println!();

    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ Failed to bind {}: {}", listen_addr, e);
            std::process::exit(1);
        }
    };

    let mut shutdown_manager = ShutdownManager::new();
    let transport = Arc::new(WsTransport::new());
    let registry = Arc::new(SessionRegistry::new(
        transport.clone(),
        config.session.call_timeout(),
    ));

    let server_registry = registry.clone();
    let heartbeat = config.server.heartbeat_interval();
    let server_token = shutdown_manager.token();
    let server_handle = tokio::spawn(async move {
        if let Err(e) =
            start_ws_server(listener, server_registry, transport, heartbeat, server_token).await
        {
            tracing::error!("❌ Remote SDK server failed: {}", e);
        }
    });
    shutdown_manager.register_task(server_handle);

    if !args.demo {
        shutdown_manager.wait_for_shutdown().await;
        return;
    }

    // The demo blocks on every call, so it gets its own OS thread. A plain
    // thread (not spawn_blocking) lets ctrl+c exit while it is still parked.
    let options = DemoOptions {
        min_peers: config.session.min_peers,
        screenshot_url: args.screenshot_url.clone(),
        ..DemoOptions::default()
    };
    let (done_tx, done_rx) = oneshot::channel();
    let demo_registry = registry.clone();
    let spawned = std::thread::Builder::new()
        .name("demo".to_string())
        .spawn(move || {
            let _ = done_tx.send(demo::basic_call(&demo_registry, &options));
        });
    if let Err(e) = spawned {
        tracing::error!("❌ Failed to start demo thread: {}", e);
        shutdown_manager.shutdown().await;
        std::process::exit(1);
    }

    let failed = tokio::select! {
        result = done_rx => match result {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::error!("❌ {}", e);
                true
            }
            Err(_) => {
                tracing::error!("❌ Demo thread exited without reporting");
                true
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("🛑 Shutdown signal received");
            false
        }
    };

    shutdown_manager.shutdown().await;
    if failed {
        std::process::exit(1);
    }
}

fn setup_logging(
    config: &config::LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let to_file = config.output == "file";
    let (writer, guard) = if to_file {
        let (dir, file_name) = log_file_target(&config.file_path);
        let appender = tracing_appender::rolling::daily(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (BoxMakeWriter::new(writer), Some(guard))
    } else {
        (BoxMakeWriter::new(std::io::stdout), None)
    };

    // journald adds its own timestamp and hostname
    let is_systemd = !to_file
        && (std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok());

    let layer: Box<dyn Layer<Registry> + Send + Sync> = if config.format == "json" {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        let compact = fmt::layer()
            .with_writer(writer)
            .with_ansi(!to_file)
            .with_target(false)
            .compact();
        if is_systemd {
            compact.without_time().boxed()
        } else {
            compact.with_timer(HostTimer::local()).boxed()
        }
    };

    tracing_subscriber::registry().with(layer).with(filter).init();
    guard
}

/// Splits `logging.file_path` into the rolling appender's directory and
/// file-name prefix.
fn log_file_target(file_path: &str) -> (std::path::PathBuf, String) {
    let path = std::path::Path::new(file_path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."))
        .to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "remoted.log".to_string());
    (dir, file_name)
}

/// UTC time plus the short hostname, e.g. "2025-12-10 18:09:43.150 [lab-pc]".
struct HostTimer {
    hostname: String,
}

impl HostTimer {
    fn local() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(&hostname)
    }

    fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.split('.').next().unwrap_or(hostname).to_string(),
        }
    }
}

impl tracing_subscriber::fmt::time::FormatTime for HostTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
