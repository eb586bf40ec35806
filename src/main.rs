use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use axum::{
    Router,
    routing::{get, post},
};
use clap::Parser;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

mod api_types;
mod auth;
pub mod authz;
mod config;
mod db;
mod middleware;
mod models;
pub mod observability;
mod routes;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::ServiceConfig>,
    pub db: Arc<db::DbPool>,
    /// Change request workflow service. Owns attachment storage and writes
    /// the audit trail alongside every mutation.
    pub change_requests: services::ChangeRequestService,
    /// Group-based access policy, normalized once at startup.
    pub policy: Arc<authz::AccessPolicy>,
}

impl AppState {
    pub async fn new(config: config::ServiceConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(db::DbPool::from_config(&config.database).await?);

        let storage = services::create_file_storage(&config.storage)
            .await
            .map_err(|e| format!("Failed to initialize attachment storage: {}", e))?;

        let change_requests = services::ChangeRequestService::new(db.clone(), storage);
        let policy = Arc::new(authz::AccessPolicy::from_config(&config.auth));

        Ok(Self {
            config: Arc::new(config),
            db,
            change_requests,
            policy,
        })
    }
}

/// CLI arguments for the Trajan change request service
#[derive(Parser, Debug)]
#[command(version, about = "Trajan change request service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./trajan.toml, creating it if missing)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./trajan.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run database migrations and exit
    ///
    /// Useful for Kubernetes init containers or CI/CD pipelines.
    /// Connects to the database, runs any pending migrations, and exits.
    Migrate,
    /// Show enabled compile-time features
    Features,
}

/// Default configuration for zero-config startup.
/// Uses SQLite and filesystem attachment storage under ./data.
fn default_config_toml() -> &'static str {
    r#"# Trajan Change Request Service Configuration
# Generated automatically for local development

[server]
host = "127.0.0.1"
port = 8080

# Identity headers are only honored from trusted sources. Before exposing
# the service beyond localhost, list your reverse proxy's CIDR ranges here.
# [server.trusted_proxies]
# cidrs = ["10.0.0.0/8"]

# SQLite database for change requests, attachments, and the audit trail
[database]
type = "sqlite"
path = "data/trajan.db"

# Attachment content on the local filesystem
[storage.filesystem]
path = "data/attachments"

# Members of these groups may approve, reject, and see every change request
[auth.approvers]
group_names = ["Change Approvers"]

# Restrict who may use the service at all (empty = any authenticated caller)
# [auth.access]
# allowed_group_names = ["Change Request Users"]
"#
}

/// Resolve the config path, creating a default config if necessary.
/// Returns the config path and whether it was newly created.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<(PathBuf, bool), String> {
    // If explicit path is provided, use it
    if let Some(path) = explicit_path {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(format!("Config file not found: {}", path.display()));
        }
        return Ok((path, false));
    }

    // Check for trajan.toml in current directory
    let cwd_config = PathBuf::from("trajan.toml");
    if cwd_config.exists() {
        return Ok((cwd_config, false));
    }

    // No config found - create default config
    create_default_config(&cwd_config)?;
    Ok((cwd_config, true))
}

/// Write the default configuration and create the data directory it points at.
fn create_default_config(path: &Path) -> Result<(), String> {
    std::fs::create_dir_all("data")
        .map_err(|e| format!("Failed to create data directory: {}", e))?;
    std::fs::write(path, default_config_toml())
        .map_err(|e| format!("Failed to write config file: {}", e))?;
    Ok(())
}

pub fn build_app(config: &config::ServiceConfig, state: AppState) -> Router {
    use routes::change_requests as cr;

    let api_routes = Router::new()
        .route("/change-requests", get(cr::list_all).post(cr::create))
        .route("/change-requests/mine", get(cr::list_mine))
        .route("/change-requests/pending", get(cr::list_pending))
        .route(
            "/change-requests/{id}",
            get(cr::get_one).put(cr::update).delete(cr::delete),
        )
        .route(
            "/change-requests/{id}/available-statuses",
            get(cr::available_statuses),
        )
        .route("/change-requests/{id}/status", post(cr::transition))
        .route("/change-requests/{id}/approve", post(cr::approve))
        .route("/change-requests/{id}/reject", post(cr::reject))
        .route("/change-requests/{id}/audit", get(cr::audit_trail))
        .route(
            "/change-requests/{id}/attachments/{attachment_id}",
            get(cr::download_attachment).delete(cr::delete_attachment),
        )
        .route("/me", get(routes::me::me))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::identity_middleware,
        ));

    // Health stays outside the identity middleware so load balancers can
    // probe it without identity headers
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api_routes);

    // Apply CORS layer if enabled (layers are applied in reverse order, so this runs first)
    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    // Request IDs are generated before tracing and copied onto responses, so
    // every log line and reply can be correlated
    app.layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Init { output, force }) => {
            run_init(output, force);
        }
        Some(Command::Migrate) => {
            run_migrate(args.config.as_deref()).await;
        }
        Some(Command::Features) => {
            run_features();
        }
        Some(Command::Serve) | None => {
            run_server(args.config.as_deref()).await;
        }
    }
}

/// Create a configuration file (non-interactive).
fn run_init(output: Option<String>, force: bool) {
    let output_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("trajan.toml"));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    // Create parent directories if needed
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = create_default_config(&output_path) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("To start the service, run:");
    println!("  trajan serve --config {}", output_path.display());
}

/// Print enabled compile-time features.
fn run_features() {
    let version = env!("CARGO_PKG_VERSION");

    let features: &[(&str, bool)] = &[
        ("server", cfg!(feature = "server")),
        ("database-sqlite", cfg!(feature = "database-sqlite")),
        ("database-postgres", cfg!(feature = "database-postgres")),
        ("s3-storage", cfg!(feature = "s3-storage")),
    ];

    println!("Trajan v{version}\n");
    println!("Compile-time features:");
    for &(name, enabled) in features {
        let status = if enabled { "enabled" } else { "disabled" };
        println!("  {name:<24} {status}");
    }
}

/// Run the change request service.
async fn run_server(explicit_config_path: Option<&str>) {
    // Resolve config path, creating default if necessary
    let (config_path, is_new_config) = match resolve_config_path(explicit_config_path) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if is_new_config {
        println!(
            "Created default configuration at: {}",
            config_path.display()
        );
        println!();
    }

    let config = match config::ServiceConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    observability::init_tracing(&config.observability);

    tracing::info!(
        config_file = %config_path.display(),
        "Starting change request service"
    );

    // Emit startup security warnings for insecure configurations
    if config.server.trusted_proxies.dangerously_trust_all {
        tracing::warn!(
            "SECURITY RISK: trusted_proxies.dangerously_trust_all is set. Identity headers \
             are honored from ANY source, so any client that can reach this service can \
             impersonate any user, approvers included."
        );
    } else if !config.server.trusted_proxies.is_configured() {
        tracing::warn!(
            "No trusted_proxies configured - identity headers are honored from every \
             connection. This is only safe when the service is reachable exclusively \
             through a trusted reverse proxy. Configure [server.trusted_proxies] with \
             your proxy's CIDR ranges."
        );
    }
    if config.auth.approvers.group_names.is_empty() && config.auth.approvers.group_ids.is_empty() {
        tracing::warn!(
            "No approver groups configured - nobody can approve or reject change requests. \
             Configure [auth.approvers] in trajan.toml."
        );
    }

    let state = AppState::new(config.clone())
        .await
        .expect("Failed to initialize application state");

    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on http://{}", bind_addr);

    // ConnectInfo carries the peer address into the identity middleware for
    // the trusted-proxy check
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests");
}

/// Connect to the database, run pending migrations, and exit.
async fn run_migrate(explicit_config_path: Option<&str>) {
    let (config_path, _) = match resolve_config_path(explicit_config_path) {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match config::ServiceConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    // Minimal observability for migration logging
    observability::init_tracing(&config.observability);

    tracing::info!(
        config_file = %config_path.display(),
        "Running database migrations"
    );

    if config.database.is_none() {
        eprintln!("Error: Database is not configured. Nothing to migrate.");
        std::process::exit(1);
    }

    match db::DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => {
                tracing::info!("Database migrations completed successfully");
                std::process::exit(0);
            }
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}
