use std::env;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use photo_cartoonizer::{
    config::{CartoonApiConfig, FallbackConfig, R2Config, UploadConfig, default_presign_expiry},
    fallback::FallbackPools,
    generation::DashScopeClient,
    object_store::{ObjectStore, R2Store},
    pipeline::CartoonPipeline,
    storage::{LocalImageStorage, ensure_dir},
    web::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let bind_address = format!("0.0.0.0:{port}");

    let api_config = CartoonApiConfig::from_env();
    if api_config.api_key.is_empty() {
        warn!("CARTOON_API_KEY is not set, generation requests will be rejected upstream");
    }

    let upload_config = UploadConfig::from_env(&bind_address);
    ensure_dir(&upload_config.dir).await?;
    let storage = Arc::new(LocalImageStorage::new(
        upload_config.dir.clone(),
        upload_config.base_url.clone(),
    ));

    // R2是可选的持久层升级；配置不全就只用本地存储。
    let (object_store, presign_expiry) = match R2Config::from_env() {
        Some(r2) => {
            info!(bucket = %r2.bucket, "R2 object store configured");
            let expiry = r2.presign_expiry;
            (
                Some(Arc::new(R2Store::new(&r2)) as Arc<dyn ObjectStore>),
                expiry,
            )
        }
        None => {
            warn!("R2 credentials incomplete, running with local storage only");
            (None, default_presign_expiry())
        }
    };

    let backend = Arc::new(DashScopeClient::new(api_config.clone()));
    let pipeline = Arc::new(CartoonPipeline::new(
        backend,
        storage.clone(),
        object_store,
        &api_config,
        presign_expiry,
    ));
    let fallback_config = FallbackConfig::from_env();
    let pools = Arc::new(FallbackPools::new(
        fallback_config.male_photos,
        fallback_config.female_photos,
    ));

    let state = AppState {
        pipeline,
        pools,
        storage,
    };
    let router = axum::Router::new()
        .route(
            "/api/cartoonize",
            post(web::handle_cartoonize).layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .nest_service("/upload", ServeDir::new(upload_config.dir.clone()))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "photo cartoonizer started");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
