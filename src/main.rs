use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kis::{
    Storage,
    api::{self, AppState},
    config::Settings,
    open_backend,
    secret::AdminSecret,
};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kis=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = open_backend(&settings.backend_config())?;
    let secret = AdminSecret::load_or_create(&settings.secret_file)?;
    let state = AppState {
        storage: Arc::new(Storage::new(backend)),
        secret,
    };
    let router = api::router(state, settings.max_upload_bytes);

    let bind_address = format!("0.0.0.0:{}", settings.port);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("KIS server started at {}", tcp_listener.local_addr()?);

    axum::serve(
        tcp_listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
    })
    .await?;
    Ok(())
}
