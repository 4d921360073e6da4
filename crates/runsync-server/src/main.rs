use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "0.0.0.0:3001";

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "runsync_server=info".into()),
        )
        .init();

    let app = runsync_server::app_router();

    let addr = std::env::var("RUNSYNC_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    tracing::info!("runsync server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
