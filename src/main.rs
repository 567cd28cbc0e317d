use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use whitelist_config_bot::infra::config::Settings;
use whitelist_config_bot::infra::logging;
use whitelist_config_bot::transport::http::{self, HttpTransport};
use whitelist_config_bot::{
    AdministratorSet, AuthorizationGate, CommandDispatcher, PersistenceGateway, SchemaRegistry,
    StopReason,
};

/// Requests queued for the worker before `POST /api/commands` starts waiting.
const COMMAND_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let settings = Settings::from_env()?;
    let _log_guard = logging::init(&settings.log_dir)?;

    let admins = Arc::new(AdministratorSet::load(&settings.administrators_file)?);
    info!(count = admins.len(), "administrators loaded");

    // --- Store ---
    let schema = Arc::new(SchemaRegistry::standard());
    let mut gateway = PersistenceGateway::new(
        settings.connector(&schema)?,
        schema.clone(),
        settings.retry.clone(),
    );
    gateway.connect().await?;
    gateway
        .verify_schema()
        .await
        .context("users table does not match the declared configuration fields (see the preflight binary)")?;
    let gateway = gateway.into_shared();

    // --- Transport ---
    let (mut transport, commands) = HttpTransport::channel(COMMAND_QUEUE_CAPACITY);
    // Long enough to cover a full reconnect cycle inside one command.
    let reply_timeout = settings.retry.delay * settings.retry.max_attempts + Duration::from_secs(30);
    let app_state = http::AppState {
        commands,
        outbox: transport.outbox(),
        gateway: gateway.clone(),
        reply_timeout,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = http::create_router(app_state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "HTTP transport listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server stopped");
        }
    });

    // --- Worker ---
    let gate = AuthorizationGate::new(gateway.clone(), admins, settings.developer_contact.clone());
    let mut dispatcher = CommandDispatcher::new(gateway, gate, settings.dispatcher_settings());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    match dispatcher.run(&mut transport, shutdown).await {
        StopReason::FatalPersistence => anyhow::bail!("stopped after a critical database error"),
        StopReason::TransportClosed => anyhow::bail!("command transport closed"),
        StopReason::Restart => {
            info!("restart requested; exiting for the supervisor to start a fresh process");
            Ok(())
        }
        StopReason::Interrupted => Ok(()),
    }
}
