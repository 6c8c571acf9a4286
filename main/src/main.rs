use std::{path::Path, sync::Arc};

use api_router::{api_routes, api_state::ApiState};
use common::{
    storage::{db::SurrealDbClient, vector_index::VectorIndex},
    utils::{
        config::get_config,
        embedding::EmbeddingProvider,
        generation::ChatGenerator,
    },
};
use ingestion_pipeline::record_source::HttpRecordSource;
use orchestrator::{AuditLogger, Core};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    // Restore the vector snapshot when one exists; its dimension must
    // agree with the configured embedder before anything is written.
    let vector_index = Arc::new(VectorIndex::load_or_new(
        Path::new(&config.vector_index_path),
        config.embedding_dimensions as usize,
    )?);
    let snapshot_dimension = vector_index.dimension().await;
    if snapshot_dimension != config.embedding_dimensions as usize {
        return Err(format!(
            "vector index snapshot has dimension {snapshot_dimension} but the embedder is configured for {}",
            config.embedding_dimensions
        )
        .into());
    }
    info!(
        vectors = vector_index.len().await,
        dimension = snapshot_dimension,
        "vector index ready"
    );

    let embedding_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.embedder_api_key)
            .with_api_base(&config.embedder_base_url),
    ));
    let embedder = EmbeddingProvider::new_openai(
        embedding_client,
        &config.embedder_model,
        config.embedding_dimensions,
    );
    info!(
        backend = embedder.backend_label(),
        model = %config.embedder_model,
        "embedding provider initialized"
    );

    let generation_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.generator_api_key)
            .with_api_base(&config.generator_base_url),
    ));
    let generator = Arc::new(ChatGenerator::new(
        generation_client,
        &config.generator_model,
    ));

    let record_source = Arc::new(HttpRecordSource::new(
        &config.record_source_base_url,
        &config.record_source_client_id,
        &config.record_source_client_secret,
    ));

    let audit = Arc::new(AuditLogger::new(&config.audit_log_dir, config.privacy_mode)?);

    let http_port = config.http_port;
    let core = Arc::new(Core::new(
        config,
        db,
        vector_index,
        embedder,
        generator,
        record_source,
        audit,
    ));
    let sweeper = core.spawn_sweeper();

    let app = api_routes(ApiState::new(core));

    info!("Starting server listening on 0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::utils::config::{AppConfig, PrivacyMode};
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let db = Arc::new(
            SurrealDbClient::memory("main_smoke", &Uuid::new_v4().to_string())
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");

        let data_dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.vector_index_path = data_dir
            .path()
            .join("vector_index")
            .to_string_lossy()
            .into_owned();
        config.audit_log_dir = data_dir.path().join("audit").to_string_lossy().into_owned();
        config.privacy_mode = PrivacyMode::Full;

        let vector_index = Arc::new(VectorIndex::new(
            config.embedding_dimensions as usize,
        ));
        let generation_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:1"),
        ));
        let audit = Arc::new(
            AuditLogger::new(&config.audit_log_dir, PrivacyMode::Full).expect("audit logger"),
        );

        let core = Arc::new(Core::new(
            config.clone(),
            db,
            vector_index,
            EmbeddingProvider::hashed(config.embedding_dimensions as usize),
            Arc::new(ChatGenerator::new(
                generation_client,
                &config.generator_model,
            )),
            Arc::new(HttpRecordSource::new("http://127.0.0.1:1", "id", "secret")),
            audit,
        ));

        let app = api_routes(ApiState::new(core));

        let live = app
            .clone()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).expect("request"))
            .await
            .expect("live response");
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("ready response");
        assert_eq!(ready.status(), StatusCode::OK);
    }
}
