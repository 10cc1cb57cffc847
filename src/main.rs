use anyhow::Context;
use axum::Router;
use roomcast::{config::Config, db, rooms, AppState, Hub, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,roomcast=debug")),
        )
        .init();

    let config = Config::from_env()?;

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .context("connecting to database")?;
    db::migrate(&db_pool).await.context("creating schema")?;

    let app_state = AppState {
        hub: Hub::new(SqliteStore::new(db_pool)),
    };

    let app = Router::new()
        .merge(rooms::router())
        .with_state(app_state)
        .layer(config.cors_layer());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
