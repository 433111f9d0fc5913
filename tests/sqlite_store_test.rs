mod helpers;

use helpers::*;
use std::sync::Arc;
use tempfile::TempDir;

use otel_recall::config::Config;
use otel_recall::db;
use otel_recall::server::open_backend;
use otel_recall::store::sqlite::SqliteBackend;
use otel_recall::telemetry::Kind;

fn sqlite_config(dir: &TempDir) -> Config {
    let mut config = test_config();
    config.storage.backend = "sqlite".into();
    config.storage.db_path = dir.path().join("vectors.db").to_string_lossy().into_owned();
    config
}

#[tokio::test]
async fn stored_telemetry_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);

    {
        let backend = open_backend(&config, "keyword-test").await.unwrap();
        let state = app_with_backend(&config, Arc::new(KeywordEmbedder), backend);
        let body = traces_body(vec![
            span("c0ffee", "0001", "http-get", 1, 30),
            span("c0ffee", "0002", "db-query", 2, 1200),
        ]);
        state
            .dispatcher
            .ingest(CLUSTER, Kind::Trace, &body, SECRET)
            .await
            .unwrap();
        state.dispatcher.shutdown().await;
        assert_eq!(state.dispatcher.stats().snapshot().stored_documents, 2);
    }

    let backend = open_backend(&config, "keyword-test").await.unwrap();
    let state = app_with_backend(&config, Arc::new(KeywordEmbedder), backend);

    let results = state
        .search
        .search("database errors", Kind::Trace, 3)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document.id, "span_c0ffee_0002");
    assert_eq!(results[0].cluster_id, CLUSTER);
    assert_eq!(
        results[0].document.metadata["status"],
        otel_recall::telemetry::Scalar::from("error")
    );

    let stats = state.gateway.stats().await.unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].info.name, "traces");
    assert_eq!(stats[0].info.dimensions, DIMS);
    assert_eq!(stats[0].documents, 2);
    state.dispatcher.shutdown().await;
}

#[tokio::test]
async fn changed_embedding_model_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vectors.db");

    let backend = SqliteBackend::new(db::open_database(&path).unwrap());
    assert_eq!(backend.record_embedding_model("model-a").await.unwrap(), None);
    assert_eq!(backend.record_embedding_model("model-a").await.unwrap(), None);
    drop(backend);

    let backend = SqliteBackend::new(db::open_database(&path).unwrap());
    assert_eq!(
        backend.record_embedding_model("model-b").await.unwrap(),
        Some("model-a".to_string())
    );

    let conn = db::open_database(&path).unwrap();
    let health = db::check_database_health(&conn).unwrap();
    assert!(health.is_healthy());
    assert_eq!(health.embedding_model.as_deref(), Some("model-a"));
}

#[tokio::test]
async fn cluster_filter_applies_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut config = sqlite_config(&dir);
    config
        .auth
        .cluster_secrets
        .insert("staging".into(), "staging-token".into());

    let backend = open_backend(&config, "keyword-test").await.unwrap();
    let state = app_with_backend(&config, Arc::new(KeywordEmbedder), backend);
    let body = logs_body(&[("ERROR", "database failed over"), ("INFO", "healthy")]);
    state
        .dispatcher
        .ingest(CLUSTER, Kind::Log, &body, SECRET)
        .await
        .unwrap();
    state
        .dispatcher
        .ingest("staging", Kind::Log, &body, "staging-token")
        .await
        .unwrap();
    state.dispatcher.shutdown().await;

    let staging = state
        .search
        .search_cluster("database failed", Kind::Log, 10, "staging")
        .await
        .unwrap();
    assert_eq!(staging.len(), 2);
    assert!(staging.iter().all(|r| r.cluster_id == "staging"));
}

#[tokio::test]
async fn busy_cluster_does_not_hide_a_quiet_one() {
    let dir = TempDir::new().unwrap();
    let mut config = sqlite_config(&dir);
    config
        .auth
        .cluster_secrets
        .insert("quiet".into(), "quiet-token".into());

    let backend = open_backend(&config, "keyword-test").await.unwrap();
    let state = app_with_backend(&config, Arc::new(KeywordEmbedder), backend);

    let lines: Vec<String> = (0..50)
        .map(|i| format!("database connection error on replica {i}"))
        .collect();
    let busy: Vec<(&str, &str)> = lines.iter().map(|l| ("ERROR", l.as_str())).collect();
    state
        .dispatcher
        .ingest(CLUSTER, Kind::Log, &logs_body(&busy), SECRET)
        .await
        .unwrap();
    state
        .dispatcher
        .ingest("quiet", Kind::Log, &logs_body(&[("INFO", "cache warmed")]), "quiet-token")
        .await
        .unwrap();
    state.dispatcher.shutdown().await;
    assert_eq!(state.dispatcher.stats().snapshot().stored_documents, 51);

    let results = state
        .search
        .search_cluster("database connection error", Kind::Log, 5, "quiet")
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].cluster_id, "quiet");
    assert!(results[0].document.text.contains("cache warmed"));

    let busy_hits = state
        .search
        .search_cluster("database connection error", Kind::Log, 5, CLUSTER)
        .await
        .unwrap();
    assert_eq!(busy_hits.len(), 5);
    assert!(busy_hits.iter().all(|r| r.cluster_id == CLUSTER));
}

#[tokio::test]
async fn terminal_search_leaves_the_recorded_model_alone() {
    let dir = TempDir::new().unwrap();
    let config = sqlite_config(&dir);

    otel_recall::cli::search::search(&config, "database errors", Kind::Log, None, None)
        .await
        .unwrap();

    let conn = db::open_database(&config.storage.db_path).unwrap();
    let health = db::check_database_health(&conn).unwrap();
    assert_eq!(health.embedding_model, None);
}
