//! Shared helpers for govdata-ingest integration tests
//!
//! - wiremock upstreams that serve numbered JSON pages
//! - record payload builders for the postcode resource types
//! - a Postgres container for store tests (needs Docker)

#![allow(dead_code)]

use anyhow::{Context, Result};
use govdata_ingest::config::TerminationPolicy;
use govdata_ingest::engine::PageFetcher;
use govdata_ingest::http::HttpFetcher;
use govdata_ingest::store::{PgRecordStore, RecordStore};
use serde_json::{json, Value as Json};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const AREA_TYPE: &str = "http://data.ordnancesurvey.co.uk/ontology/postcode/PostcodeArea";
pub const DISTRICT_TYPE: &str = "http://data.ordnancesurvey.co.uk/ontology/postcode/PostcodeDistrict";
pub const SECTOR_TYPE: &str = "http://data.ordnancesurvey.co.uk/ontology/postcode/PostcodeSector";
pub const UNIT_TYPE: &str = "http://data.ordnancesurvey.co.uk/ontology/postcode/PostcodeUnit";

const LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
const WITHIN: &str = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/within";

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,govdata_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Payloads
// ============================================================================

pub fn area_id(n: usize) -> String {
    format!("http://data.ordnancesurvey.co.uk/id/postcodearea/A{}", n)
}

/// A postcode area resource
pub fn area(n: usize, label: &str) -> Json {
    json!({
        "@id": area_id(n),
        LABEL: [{"@value": label}],
    })
}

/// `count` area resources numbered from `first`
pub fn area_page(first: usize, count: usize) -> Json {
    Json::Array((first..first + count).map(|n| area(n, &format!("Area {}", n))).collect())
}

/// A resource of any postcode type with parents in `within`
pub fn resource(id: &str, label: &str, within: &[&str]) -> Json {
    let within: Vec<Json> = within.iter().map(|parent| json!({"@id": parent})).collect();
    json!({
        "@id": id,
        LABEL: [{"@value": label}],
        WITHIN: within,
    })
}

// ============================================================================
// Upstreams
// ============================================================================

pub fn ok_json(body: &Json) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Serve `pages[i]` as page `i + 1` of `/resources.json`; every later page
/// is an empty array.
pub async fn mount_pages(server: &MockServer, pages: &[Json]) {
    for (index, body) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/resources.json"))
            .and(query_param("page", (index + 1).to_string()))
            .respond_with(ok_json(body))
            .mount(server)
            .await;
    }
    mount_empty_tail(server, "/resources.json").await;
}

pub async fn mount_empty_tail(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route.to_string()))
        .respond_with(ok_json(&json!([])))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Serve `pages` for one postcode `type_uri` only
pub async fn mount_typed_pages(server: &MockServer, type_uri: &str, pages: &[Json]) {
    for (index, body) in pages.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/resources.json"))
            .and(query_param("type_uri", type_uri))
            .and(query_param("page", (index + 1).to_string()))
            .respond_with(ok_json(body))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/resources.json"))
        .and(query_param("type_uri", type_uri))
        .respond_with(ok_json(&json!([])))
        .with_priority(10)
        .mount(server)
        .await;
}

/// Locator of the paginated test resource
pub fn locator(server: &MockServer) -> String {
    format!("{}/resources.json?dataset=postcodes", server.uri())
}

pub fn fetcher(
    store: Arc<dyn RecordStore>,
    page_size: usize,
    termination: TerminationPolicy,
) -> PageFetcher {
    fetcher_with_timeout(store, page_size, termination, Duration::from_secs(5))
}

pub fn fetcher_with_timeout(
    store: Arc<dyn RecordStore>,
    page_size: usize,
    termination: TerminationPolicy,
    timeout: Duration,
) -> PageFetcher {
    let http = HttpFetcher::new(timeout, "govdata-ingest-tests").expect("HTTP client");
    PageFetcher::new(http, store, page_size, termination)
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("postgresql://postgres:postgres@{}:{}/postgres", host, port))
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self { _container: container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn store(&self) -> PgRecordStore {
        PgRecordStore::new(self.pool.clone())
    }
}
