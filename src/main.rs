use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use wopi_proxy::config::ServiceConfig;
use wopi_proxy::core::audit::AuditLog;
use wopi_proxy::core::callback::CallbackDispatcher;
use wopi_proxy::core::storage::{Storage, StorageProtocol};
use wopi_proxy::core::tenant::{hash_api_token, EditorMode, Tenant};
use wopi_proxy::core::token::TokenService;
use wopi_proxy::manager::SessionManager;
use wopi_proxy::registry::{StorageRegistry, TenantRegistry};
use wopi_proxy::store::{SqliteStore, StorageRepository, TenantRepository};
use wopi_proxy::AppState;

#[derive(Parser)]
#[command(name = "wopi-proxy")]
#[command(about = "Multi-tenant WOPI proxy", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "wopi-proxy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WOPI proxy HTTP server.
    Serve,

    /// Manage tenants directly against the configured database.
    Tenants {
        #[command(subcommand)]
        action: TenantAction,
    },

    /// Manage a tenant's storage backends directly against the database.
    Storages {
        #[command(subcommand)]
        action: StorageAction,
    },

    /// Thin client for the Management API (C10).
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum TenantAction {
    /// List all tenants.
    List,

    /// Register a new tenant. Prints the plaintext API token once; only its
    /// hash is persisted.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "own")]
        editor_mode: String,
        #[arg(long)]
        editor_url: Option<String>,
        #[arg(long)]
        callback_base_url: Option<String>,
        #[arg(long)]
        callback_auth: Option<String>,
        #[arg(long)]
        no_edit: bool,
    },

    /// Remove a tenant.
    Remove { tenant_id: Uuid },
}

#[derive(Subcommand)]
enum StorageAction {
    /// List a tenant's storage backends.
    List { tenant_id: Uuid },

    /// Register a local-disk storage backend for a tenant.
    Add {
        tenant_id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        root: PathBuf,
    },

    /// Remove a tenant's storage backend.
    Remove { tenant_id: Uuid, name: String },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List active sessions for the authenticated tenant.
    List {
        #[arg(long, env = "WOPI_PROXY_TENANT_TOKEN")]
        api_token: String,
    },

    /// Fetch a single session projection.
    Get {
        session_id: Uuid,
        #[arg(long, env = "WOPI_PROXY_TENANT_TOKEN")]
        api_token: String,
    },

    /// Close a session, releasing its lock if held.
    Close {
        session_id: Uuid,
        #[arg(long, env = "WOPI_PROXY_TENANT_TOKEN")]
        api_token: String,
    },

    /// Sweep expired sessions belonging to the authenticated tenant.
    Cleanup {
        #[arg(long)]
        dry_run: bool,
        #[arg(long, env = "WOPI_PROXY_TENANT_TOKEN")]
        api_token: String,
    },
}

fn init_logging() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp")).join(".wopi-proxy/logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "wopi-proxy.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "wopi_proxy=info".into()),
    );

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve(&cli.config).await,
        Commands::Tenants { action } => tenants(&cli.config, action).await,
        Commands::Storages { action } => storages(&cli.config, action).await,
        Commands::Sessions { action } => sessions(&cli.config, action).await,
    }
}

async fn open_store(config_path: &PathBuf) -> anyhow::Result<(ServiceConfig, Arc<SqliteStore>)> {
    let config = ServiceConfig::load(config_path)?;
    let store = Arc::new(SqliteStore::new(&config.database_path).await?);
    Ok((config, store))
}

async fn serve(config_path: &PathBuf) -> anyhow::Result<()> {
    let (config, store) = open_store(config_path).await?;

    let session_store: Arc<dyn wopi_proxy::store::SessionStore> = store.clone();
    let tenant_repo: Arc<dyn TenantRepository> = store.clone();
    let storage_repo: Arc<dyn StorageRepository> = store.clone();
    let audit_log: Arc<dyn AuditLog> = store.clone();

    let cache_ttl = Duration::from_secs(config.tenant_cache_ttl_secs);
    let tenants = Arc::new(TenantRegistry::new(tenant_repo, cache_ttl));
    let storages = Arc::new(StorageRegistry::new(storage_repo, cache_ttl));
    let tokens = TokenService::new(config.token_secret.clone());
    let callbacks = CallbackDispatcher::spawn();

    let manager = Arc::new(SessionManager::new(
        session_store.clone(),
        tenants.clone(),
        storages.clone(),
        tokens.clone(),
        audit_log.clone(),
        callbacks.clone(),
        config.proxy_base_url.clone(),
        config.discovery_action_path.clone(),
        config.pool_editor_url.clone(),
        chrono::Duration::seconds(config.session_ttl_secs),
    ));

    let state = AppState {
        sessions: session_store,
        tenants,
        storages,
        tokens,
        audit: audit_log,
        callbacks,
        manager,
        lock_ttl: chrono::Duration::seconds(config.lock_ttl_secs),
        request_deadline: Duration::from_secs(config.request_deadline_secs),
    };

    let app = wopi_proxy::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "wopi proxy listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn tenants(config_path: &PathBuf, action: TenantAction) -> anyhow::Result<()> {
    let (_, store) = open_store(config_path).await?;

    match action {
        TenantAction::List => {
            for tenant in store.list_tenants().await? {
                println!(
                    "{}  {:<20} active={} editor_mode={:?}",
                    tenant.id, tenant.name, tenant.active, tenant.editor_mode
                );
            }
        }
        TenantAction::Add { name, editor_mode, editor_url, callback_base_url, callback_auth, no_edit } => {
            let editor_mode = match editor_mode.to_lowercase().as_str() {
                "own" => EditorMode::Own,
                "pool" => EditorMode::Pool,
                "disabled" => EditorMode::Disabled,
                other => anyhow::bail!("unknown editor mode '{other}', use own|pool|disabled"),
            };

            let api_token = Uuid::new_v4().to_string();
            let tenant = Tenant {
                id: Uuid::new_v4(),
                name,
                active: true,
                editor_mode,
                editor_url,
                callback_base_url,
                callback_auth,
                api_token_hash: hash_api_token(&api_token),
                allow_edit: !no_edit,
            };

            store.upsert_tenant(&tenant).await?;
            println!("Created tenant {}", tenant.id);
            println!("API token (shown once): {api_token}");
        }
        TenantAction::Remove { tenant_id } => {
            store.remove_tenant(tenant_id).await?;
            println!("Removed tenant {tenant_id}");
        }
    }

    Ok(())
}

async fn storages(config_path: &PathBuf, action: StorageAction) -> anyhow::Result<()> {
    let (_, store) = open_store(config_path).await?;

    match action {
        StorageAction::List { tenant_id } => {
            for storage in store.list_storages(tenant_id).await? {
                println!("{:<20} protocol={:?} config={}", storage.name, storage.protocol, storage.config);
            }
        }
        StorageAction::Add { tenant_id, name, root } => {
            std::fs::create_dir_all(&root)?;
            let storage = Storage {
                tenant_id,
                name,
                protocol: StorageProtocol::Local,
                config: root.display().to_string(),
                capabilities: Storage::local_capabilities(),
            };
            store.upsert_storage(&storage).await?;
            println!("Created storage '{}' for tenant {tenant_id}", storage.name);
        }
        StorageAction::Remove { tenant_id, name } => {
            store.remove_storage(tenant_id, &name).await?;
            println!("Removed storage '{name}' for tenant {tenant_id}");
        }
    }

    Ok(())
}

async fn sessions(config_path: &PathBuf, action: SessionAction) -> anyhow::Result<()> {
    let config = ServiceConfig::load(config_path)?;
    let client = reqwest::Client::new();
    let base = config.proxy_base_url.trim_end_matches('/');

    match action {
        SessionAction::List { api_token } => {
            let response = client.get(format!("{base}/sessions")).bearer_auth(api_token).send().await?;
            print_response(response).await?;
        }
        SessionAction::Get { session_id, api_token } => {
            let response =
                client.get(format!("{base}/sessions/{session_id}")).bearer_auth(api_token).send().await?;
            print_response(response).await?;
        }
        SessionAction::Close { session_id, api_token } => {
            let response = client
                .post(format!("{base}/sessions/{session_id}/close"))
                .bearer_auth(api_token)
                .send()
                .await?;
            print_response(response).await?;
        }
        SessionAction::Cleanup { dry_run, api_token } => {
            let response = client
                .post(format!("{base}/sessions/cleanup"))
                .bearer_auth(api_token)
                .json(&serde_json::json!({ "dry_run": dry_run }))
                .send()
                .await?;
            print_response(response).await?;
        }
    }

    Ok(())
}

async fn print_response(response: reqwest::Response) -> anyhow::Result<()> {
    let status = response.status();
    let text = response.text().await?;
    println!("{status}: {text}");
    Ok(())
}
