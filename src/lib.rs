pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod events;
pub mod services;
pub mod state;

use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
pub use config::Config;
use db::{Store, UserRole};
use services::{PasswordPolicy, RESTART_EXIT_CODE, RosterSync};
use state::SharedState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let config = Config::load_with_override(cli.config.as_deref())?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let mut log_level = config.general.log_level.clone();
    if config.general.suppress_connection_errors {
        log_level.push_str(",reqwest::retry=off,hyper_util=off");
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder();
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key, value)?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    match cli.command {
        None | Some(cli::Commands::Daemon) => run_daemon(config, prometheus_handle).await,
        Some(cli::Commands::Grant { chat_id, role }) => cmd_grant(&config, chat_id, &role).await,
        Some(cli::Commands::Users) => cmd_users(&config).await,
        Some(cli::Commands::Init) => {
            if Config::create_default_if_missing()? {
                println!("✓ Config file created. Edit config.toml and run again.");
            } else {
                println!("Config file already exists, leaving it untouched.");
            }
            Ok(())
        }
    }
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Chime v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let server_enabled = config.server.enabled;
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    // A migration failure propagates out of here and aborts startup; a daemon
    // running against a half-migrated schema would be worse than no daemon.
    let (shared, mut restart_rx) = SharedState::new(config).await?;
    let shared = Arc::new(shared);

    let api_state = api::create_app_state(shared.clone(), prometheus_handle);

    let server_handle = if server_enabled {
        info!("Starting API server on {}:{}", server_host, server_port);
        let app = api::router(api_state).await;
        let listener = tokio::net::TcpListener::bind(&format!("{server_host}:{server_port}"))
            .await
            .context("Failed to bind API server")?;
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        info!("API server disabled in config");
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    tokio::select! {
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => error!("Error listening for shutdown signal: {}", e),
            }
        }
        _ = restart_rx.recv() => {
            error!(
                "Watchdog requested a restart; exiting with code {}",
                RESTART_EXIT_CODE
            );
            shared.disclosures.shutdown().await;
            std::process::exit(RESTART_EXIT_CODE);
        }
    }

    if let Some(handle) = server_handle {
        handle.abort();
    }
    shared.disclosures.shutdown().await;

    info!("Daemon stopped");
    Ok(())
}

async fn cmd_grant(config: &Config, chat_id: i64, role: &str) -> anyhow::Result<()> {
    let Some(role) = UserRole::parse(role) else {
        println!("Unknown role: {role}");
        println!("Valid roles: curator, admin");
        return Ok(());
    };
    if chat_id <= 0 {
        println!("Chat id must be a positive integer, got {chat_id}");
        return Ok(());
    }

    let store = Store::new(&config.general.database_path).await?;
    let policy = PasswordPolicy::new(config.security.clone());
    let user = RosterSync::new(store, policy).grant(chat_id, role).await?;

    println!("✓ Granted {} to chat id {}", user.role, user.id);
    if !user.password_changed {
        println!("  Default password is set; first authorization forces a change.");
    }
    Ok(())
}

async fn cmd_users(config: &Config) -> anyhow::Result<()> {
    let store = Store::new(&config.general.database_path).await?;
    let users = store.list_users().await?;

    if users.is_empty() {
        println!("No privileged users.");
        println!("Grant one with: chime grant <chat_id> <role>");
        return Ok(());
    }

    println!("Privileged Users ({} total)", users.len());
    println!("{:-<70}", "");
    for user in users {
        let password = if user.password_changed {
            "customized"
        } else {
            "role default"
        };
        let two_fa = if user.two_fa_enabled { "on" } else { "off" };
        let last_auth = if user.last_auth_time == 0 {
            "never authenticated".to_string()
        } else {
            chrono::DateTime::from_timestamp(user.last_auth_time, 0).map_or_else(
                || format!("last auth at {}", user.last_auth_time),
                |dt| format!("last auth at {}", dt.format("%Y-%m-%d %H:%M:%S UTC")),
            )
        };
        println!(
            "  • {} [{}] password: {}, 2FA: {}, {}",
            user.id, user.role, password, two_fa, last_auth
        );
    }
    Ok(())
}
