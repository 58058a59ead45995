use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use quorum_domain::config::{Config, ConfigSeverity};
use quorum_gateway::api;
use quorum_gateway::cli::{self, Cli, Command, ConfigCommand};
use quorum_gateway::events::EventBus;
use quorum_gateway::runtime::{MeetingRegistry, Services};
use quorum_gateway::state::AppState;
use quorum_providers::{LlmProvider, OpenAiCompatProvider, UnconfiguredProvider};
use quorum_store::{CredentialStore, MessageLog, SessionStore, SocketStore, WallStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = cli::load_config(&cli.config)?;
            if !cli::validate(&config, &cli.config) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = cli::load_config(&cli.config)?;
            cli::show(&config);
            Ok(())
        }
    }
}

/// Initialize structured tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,quorum_gateway=debug")),
        )
        .init();
}

/// Start the gateway server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("Quorum starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let state_path = &config.storage.state_path;

    // ── Stores ───────────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(state_path).context("initializing session store")?);
    let log = Arc::new(MessageLog::new(state_path).context("initializing message log")?);
    let wall = Arc::new(WallStore::new(state_path).context("initializing wall store")?);
    let sockets = Arc::new(SocketStore::new(state_path).context("initializing socket store")?);
    let credentials = Arc::new(
        CredentialStore::new(state_path, &config.auth.token_prefix)
            .context("initializing credential store")?,
    );
    tracing::info!(path = %state_path.display(), "stores ready");

    // ── LLM provider ─────────────────────────────────────────────────
    let llm: Arc<dyn LlmProvider> = match OpenAiCompatProvider::from_config(&config.llm) {
        Ok(provider) => {
            tracing::info!(
                base_url = %config.llm.base_url,
                default_model = %config.llm.default_model,
                "LLM provider ready"
            );
            Arc::new(provider)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "LLM provider not configured — internal agent turns will pass with an error message"
            );
            Arc::new(UnconfiguredProvider::new(e.to_string()))
        }
    };

    // ── Event bus + meeting registry ─────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(MeetingRegistry::new());
    tracing::info!("event bus + meeting registry ready");

    let services = Services {
        sessions: sessions.clone(),
        log,
        wall: wall.clone(),
        sockets: sockets.clone(),
        bus,
        registry,
        llm,
        config: config.meetings.clone(),
    };
    let state = AppState {
        config: config.clone(),
        services,
        credentials: credentials.clone(),
    };

    // ── Periodic store flush ─────────────────────────────────────────
    {
        let sessions = sessions.clone();
        let wall = wall.clone();
        let sockets = sockets.clone();
        let credentials = credentials.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                for (name, result) in [
                    ("sessions", sessions.flush()),
                    ("wall", wall.flush()),
                    ("sockets", sockets.flush()),
                    ("credentials", credentials.flush()),
                ] {
                    if let Err(e) = result {
                        tracing::warn!(store = name, error = %e, "store flush failed");
                    }
                }
            }
        });
    }

    // ── CORS layer (config-aware) ────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit (backpressure protection) ────────────────
    let max_concurrent = std::env::var("QUORUM_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Rate-limit layer (per-IP token bucket via governor) ─────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );

        GovernorLayer {
            config: std::sync::Arc::new(gov_config),
        }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    // ── Router ───────────────────────────────────────────────────────
    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state)
    } else {
        router.with_state(state)
    };

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "Quorum listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may carry a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`), expanded into a predicate that matches
/// any port on that host. A literal `"*"` allows all origins (not
/// recommended for production).
fn build_cors_layer(cors: &quorum_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    // Special case: if the only entry is "*", use fully permissive CORS.
    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    // Partition into exact origins and wildcard-port patterns.
    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            // e.g. "http://localhost:*" -> prefix "http://localhost:"
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            // Wildcard-port patterns: the remainder must be digits only,
            // otherwise "http://localhost:3000.evil.com" would slip by.
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
