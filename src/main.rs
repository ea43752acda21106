use clap::Parser;
use kagami::config::Config;
use kagami::proxy::{initialize, KagamiProxy};
use pingora_core::server::configuration::Opt;
use pingora_core::server::Server;
use pingora_core::services::background::background_service;
use std::path::PathBuf;

/// Kagami - tiered content protection gateway built with Cloudflare's Pingora
#[derive(Parser, Debug)]
#[command(name = "kagami")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Daemon mode
    #[arg(short = 'd', long)]
    daemon: bool,

    /// Test configuration and exit
    #[arg(long)]
    test: bool,

    /// Upgrade workers gracefully
    #[arg(long)]
    upgrade: bool,
}

fn exit_with(message: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", message, error);
    std::process::exit(1);
}

fn main() {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .unwrap_or_else(|e| exit_with("Failed to load configuration", e));

    kagami::logging::init_subscriber(&config.logging)
        .unwrap_or_else(|e| exit_with("Failed to initialize logging subsystem", e));

    tracing::info!(
        config_file = %args.config.display(),
        server_address = %config.server.address,
        server_port = config.server.port,
        tiers = config.tiers.policies.len(),
        assets = config.catalog.assets.len(),
        session_enabled = config.session.is_some(),
        "Configuration loaded successfully"
    );

    if args.test {
        println!("Configuration {} is valid", args.config.display());
        return;
    }

    // Redis connection managers and S3 clients live on this runtime; it must
    // outlive the server.
    let support_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("kagami-support")
        .enable_all()
        .build()
        .unwrap_or_else(|e| exit_with("Failed to start support runtime", e));

    let components = support_runtime
        .block_on(initialize(&config))
        .unwrap_or_else(|e| exit_with("Failed to initialize components", format!("{:#}", e)));

    let opt = Opt {
        daemon: args.daemon,
        upgrade: args.upgrade,
        ..Default::default()
    };

    let mut server =
        Server::new(Some(opt)).unwrap_or_else(|e| exit_with("Failed to create Pingora server", e));
    server.bootstrap();

    let session_cookie = config.session.as_ref().map(|s| s.cookie_name.clone());
    let proxy = KagamiProxy::new(
        components.gateway,
        config.server.trust_forwarded_for,
        session_cookie,
    );

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
    proxy_service.threads = Some(config.server.threads);

    let listen_addr = config.server.listen_addr();
    proxy_service.add_tcp(&listen_addr);

    server.add_service(proxy_service);
    server.add_service(background_service("cache sweeper", components.cache_sweep));
    server.add_service(background_service("access log", components.access_log));
    if let Some(cleanup) = components.bucket_cleanup {
        server.add_service(background_service("rate limit cleanup", cleanup));
    }

    tracing::info!(address = %listen_addr, "Starting Kagami");

    // Blocks until shutdown
    server.run_forever();
}
