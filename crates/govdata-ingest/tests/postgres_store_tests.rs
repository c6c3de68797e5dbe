//! Postgres record store against a real database
//!
//! These start a PostgreSQL container and are ignored by default:
//!
//! ```bash
//! cargo test -p govdata-ingest --test postgres_store_tests -- --ignored
//! ```

mod common;

use chrono::NaiveDate;
use common::*;
use govdata_ingest::config::{LoadMode, SourceUrls, TerminationPolicy};
use govdata_ingest::datasets::exam_results::EXAM_RESULTS;
use govdata_ingest::datasets::postcodes::{POSTCODE_AREAS, POSTCODE_UNITS};
use govdata_ingest::datasets::schools::{LOCAL_AUTHORITIES, SCHOOLS};
use govdata_ingest::datasets::{Dataset, DatasetLoader, LocalAuthority, School};
use govdata_ingest::store::{Entity, NaturalKey, RecordStore, Row, UpsertOutcome, Value};
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use wiremock::MockServer;

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_ensure_schema_is_repeatable() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store();

    for _ in 0..2 {
        for schema in [&POSTCODE_AREAS, &POSTCODE_UNITS, &LOCAL_AUTHORITIES, &SCHOOLS, &EXAM_RESULTS] {
            store.ensure_schema(schema).await.expect("ensure schema");
        }
    }

    let index_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_indexes WHERE tablename = 'postcode_units' AND indexname LIKE 'idx_%'",
    )
    .fetch_one(pg.pool())
    .await
    .expect("count indexes");
    assert_eq!(index_count, 6);

    let key_type: String = sqlx::query_scalar(
        "SELECT data_type FROM information_schema.columns WHERE table_name = 'schools' AND column_name = 'id'",
    )
    .fetch_one(pg.pool())
    .await
    .expect("key column");
    assert_eq!(key_type, "bigint");
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_upsert_inserts_then_updates() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store();
    store.ensure_schema(&LOCAL_AUTHORITIES).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let authority = LocalAuthority { id: 201, name: "City of London".into() };
    assert_eq!(tx.upsert(&authority.to_row()).await.unwrap(), UpsertOutcome::Inserted);
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let renamed = LocalAuthority { id: 201, name: "City of London Corporation".into() };
    assert_eq!(tx.upsert(&renamed.to_row()).await.unwrap(), UpsertOutcome::Updated);
    tx.commit().await.unwrap();

    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM local_authorities")
        .fetch_all(pg.pool())
        .await
        .unwrap();
    assert_eq!(rows, vec![(201, "City of London Corporation".to_string())]);

    let (created, updated): (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) =
        sqlx::query_as("SELECT created_at, updated_at FROM local_authorities WHERE id = 201")
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert!(updated >= created);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_rollback_and_drop_discard_writes() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store();
    store.ensure_schema(&POSTCODE_AREAS).await.unwrap();

    let row = |key: &str| Row::new(&POSTCODE_AREAS, NaturalKey::from(key), vec![Value::Text("x".into())]);

    let mut tx = store.begin().await.unwrap();
    tx.upsert(&row("rolled-back")).await.unwrap();
    tx.rollback().await.unwrap();

    {
        let mut tx = store.begin().await.unwrap();
        tx.upsert(&row("dropped")).await.unwrap();
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM postcode_areas")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_typed_columns_round_trip() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let store = pg.store();
    store.ensure_schema(&SCHOOLS).await.unwrap();

    let school = School {
        id: 100000,
        local_authority_id: Some(201),
        establishment_name: "The Aldgate School".into(),
        open_date: NaiveDate::from_ymd_opt(1996, 9, 1),
        ..School::default()
    };
    let mut tx = store.begin().await.unwrap();
    tx.upsert(&school.to_row()).await.unwrap();
    tx.commit().await.unwrap();

    let (name, opened, closed, capacity): (String, Option<NaiveDate>, Option<NaiveDate>, Option<i64>) =
        sqlx::query_as(
            "SELECT establishment_name, open_date, close_date, school_capacity FROM schools WHERE id = $1",
        )
        .bind(100000_i64)
        .fetch_one(pg.pool())
        .await
        .unwrap();

    assert_eq!(name, "The Aldgate School");
    assert_eq!(opened, NaiveDate::from_ymd_opt(1996, 9, 1));
    assert_eq!(closed, None);
    assert_eq!(capacity, None);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_postcode_load_twice_is_idempotent() {
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL");
    let server = MockServer::start().await;
    mount_typed_pages(&server, AREA_TYPE, &[area_page(0, 30), area_page(30, 5)]).await;
    mount_typed_pages(&server, DISTRICT_TYPE, &[json!([])]).await;
    mount_typed_pages(&server, SECTOR_TYPE, &[json!([])]).await;
    mount_typed_pages(&server, UNIT_TYPE, &[json!([])]).await;

    let urls = SourceUrls::postcodes_at(&server.uri());
    let loader = DatasetLoader::new(
        fetcher(Arc::new(pg.store()), 30, TerminationPolicy::Lenient),
        LoadMode::Concurrent,
    );

    let first = loader.load(Dataset::Postcodes, &urls).await.unwrap();
    let snapshot: Vec<(String, String)> =
        sqlx::query_as("SELECT id, label FROM postcode_areas ORDER BY id")
            .fetch_all(pg.pool())
            .await
            .unwrap();

    let second = loader.load(Dataset::Postcodes, &urls).await.unwrap();
    let after: Vec<(String, String)> =
        sqlx::query_as("SELECT id, label FROM postcode_areas ORDER BY id")
            .fetch_all(pg.pool())
            .await
            .unwrap();

    assert_eq!(first.total(), 35);
    assert_eq!(second.total(), 35);
    assert_eq!(snapshot.len(), 35);
    assert_eq!(after, snapshot);
}
