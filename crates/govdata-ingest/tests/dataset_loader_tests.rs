//! Dataset loader: schema preparation, source ordering, failure handling

mod common;

use common::*;
use govdata_ingest::config::{LoadMode, SourceUrls, TerminationPolicy};
use govdata_ingest::datasets::{Dataset, DatasetLoader};
use govdata_ingest::error::IngestError;
use govdata_ingest::store::{MemoryStore, NaturalKey, Value};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AREA: &str = "http://data.ordnancesurvey.co.uk/id/postcodearea/SW";
const DISTRICT: &str = "http://data.ordnancesurvey.co.uk/id/postcodedistrict/SW1A";
const SECTOR: &str = "http://data.ordnancesurvey.co.uk/id/postcodesector/SW1A1";
const UNIT: &str = "http://data.ordnancesurvey.co.uk/id/postcodeunit/SW1A1AA";

async fn postcode_upstream() -> MockServer {
    let server = MockServer::start().await;
    mount_typed_pages(&server, AREA_TYPE, &[json!([resource(AREA, "SW", &[])])]).await;
    mount_typed_pages(&server, DISTRICT_TYPE, &[json!([resource(DISTRICT, "SW1A", &[AREA])])]).await;
    mount_typed_pages(
        &server,
        SECTOR_TYPE,
        &[json!([resource(SECTOR, "SW1A 1", &[AREA, DISTRICT])])],
    )
    .await;
    mount_typed_pages(
        &server,
        UNIT_TYPE,
        &[json!([resource(UNIT, "SW1A 1AA", &[AREA, DISTRICT, SECTOR])])],
    )
    .await;
    server
}

fn loader(store: &MemoryStore, mode: LoadMode) -> DatasetLoader {
    DatasetLoader::new(fetcher(Arc::new(store.clone()), 250, TerminationPolicy::Lenient), mode)
}

#[tokio::test]
async fn test_sequential_postcode_load() {
    init_test_tracing();
    let server = postcode_upstream().await;
    let store = MemoryStore::new();

    let report = loader(&store, LoadMode::Sequential)
        .load(Dataset::Postcodes, &SourceUrls::postcodes_at(&server.uri()))
        .await
        .unwrap();

    let names: Vec<&str> = report.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["postcode-districts", "postcode-sectors", "postcode-areas", "postcode-units"]
    );
    assert_eq!(report.dataset, "postcodes");
    assert_eq!(report.total(), 4);

    let unit = store.row("postcode_units", &NaturalKey::from(UNIT)).unwrap();
    assert_eq!(unit.values[0], Value::Text(SECTOR.into()));
    assert_eq!(unit.values[1], Value::Text(DISTRICT.into()));
    assert_eq!(unit.values[2], Value::Text(AREA.into()));

    let sector = store.row("postcode_sectors", &NaturalKey::from(SECTOR)).unwrap();
    assert_eq!(sector.values, vec![Value::Text(DISTRICT.into()), Value::Text("SW1A 1".into())]);
}

#[tokio::test]
async fn test_concurrent_postcode_load_reports_in_plan_order() {
    let server = postcode_upstream().await;
    let store = MemoryStore::new();

    let report = loader(&store, LoadMode::Concurrent)
        .load(Dataset::Postcodes, &SourceUrls::postcodes_at(&server.uri()))
        .await
        .unwrap();

    let names: Vec<&str> = report.sources.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["postcode-districts", "postcode-sectors", "postcode-areas", "postcode-units"]
    );
    for table in ["postcode_areas", "postcode_districts", "postcode_sectors", "postcode_units"] {
        assert_eq!(store.row_count(table), 1, "{}", table);
    }
    // one committed page per source
    assert_eq!(store.commits(), 4);
}

#[tokio::test]
async fn test_schemas_exist_before_any_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let store = MemoryStore::new();

    let result = loader(&store, LoadMode::Sequential)
        .load(Dataset::Postcodes, &SourceUrls::postcodes_at(&server.uri()))
        .await;

    assert!(matches!(result, Err(IngestError::Transport { .. })));
    for table in ["postcode_areas", "postcode_districts", "postcode_sectors", "postcode_units"] {
        assert!(store.has_table(table), "{}", table);
    }
}

#[tokio::test]
async fn test_sequential_failure_aborts_remaining_sources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type_uri", DISTRICT_TYPE))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    // every other source would succeed if it were fetched
    mount_typed_pages(&server, SECTOR_TYPE, &[json!([resource(SECTOR, "SW1A 1", &[DISTRICT])])]).await;
    mount_typed_pages(&server, AREA_TYPE, &[json!([resource(AREA, "SW", &[])])]).await;
    mount_typed_pages(&server, UNIT_TYPE, &[json!([resource(UNIT, "SW1A 1AA", &[SECTOR])])]).await;

    let store = MemoryStore::new();
    let result = loader(&store, LoadMode::Sequential)
        .load(Dataset::Postcodes, &SourceUrls::postcodes_at(&server.uri()))
        .await;

    assert!(matches!(result, Err(IngestError::Transport { .. })));
    assert_eq!(store.row_count("postcode_sectors"), 0);
    assert_eq!(store.row_count("postcode_units"), 0);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_concurrent_failure_is_returned_after_peers_finish() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type_uri", UNIT_TYPE))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_typed_pages(&server, DISTRICT_TYPE, &[json!([resource(DISTRICT, "SW1A", &[AREA])])]).await;
    mount_typed_pages(&server, SECTOR_TYPE, &[json!([resource(SECTOR, "SW1A 1", &[DISTRICT])])]).await;
    mount_typed_pages(&server, AREA_TYPE, &[json!([resource(AREA, "SW", &[])])]).await;

    let store = MemoryStore::new();
    let result = loader(&store, LoadMode::Concurrent)
        .load(Dataset::Postcodes, &SourceUrls::postcodes_at(&server.uri()))
        .await;

    match result {
        Err(IngestError::Transport { url, message }) => {
            assert!(url.contains("PostcodeUnit"));
            assert_eq!(message, "404 Not Found");
        },
        other => panic!("expected transport error, got {:?}", other),
    }
    // peers were not cancelled
    assert_eq!(store.row_count("postcode_districts"), 1);
    assert_eq!(store.row_count("postcode_sectors"), 1);
    assert_eq!(store.row_count("postcode_areas"), 1);
}

#[tokio::test]
async fn test_school_and_exam_datasets() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/edubase.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "URN,LA (code),LA (name),EstablishmentName,OpenDate\n\
             100000,201,City of London,The Aldgate School,01/09/1996\n\
             100001,201,City of London,City of London School for Girls,\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ks4.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "LEA,URN,SCHNAME,TOTPUPS,ATT8SCR,P8MEA,PTEBACC_E_PTQ_EE,PTL2BASICS_94\n\
             201,100000,The Aldgate School,58,52.1,0.35,41%,76%\n\
             201,,City of London,58,52.1,0.35,41%,76%\n",
        ))
        .mount(&server)
        .await;

    let urls = SourceUrls {
        edubase: format!("{}/edubase.csv", server.uri()),
        ks4_results: format!("{}/ks4.csv", server.uri()),
        ks4_academic_year: "2022-2023".to_string(),
        ..SourceUrls::default()
    };
    let store = MemoryStore::new();
    let loader = loader(&store, LoadMode::Sequential);

    let schools = loader.load(Dataset::Schools, &urls).await.unwrap();
    assert_eq!(schools.total(), 2);
    assert_eq!(store.row_count("schools"), 2);
    assert_eq!(store.row_count("local_authorities"), 1);

    let exams = loader.load(Dataset::ExamResults, &urls).await.unwrap();
    assert_eq!(exams.total(), 2);
    assert_eq!(exams.sources[0].report.skipped, 1);
    assert_eq!(store.row_count("exam_results"), 1);

    let result = store.row("exam_results", &NaturalKey::Int(100000)).unwrap();
    assert_eq!(result.values[2], Value::Text("2022-2023".into()));
    assert_eq!(result.values[4], Value::Float(Some(52.1)));
}
