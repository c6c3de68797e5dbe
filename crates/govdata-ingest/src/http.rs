//! HTTP fetch
//!
//! A thin wrapper over `reqwest` that turns anything other than `200 OK`
//! into an [`IngestError::Transport`] carrying the URL and status text.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{IngestError, Result};

/// HTTP client shared by every record source of a load
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Fetch the full body of `url`. Only `200 OK` counts as success.
    pub async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| IngestError::transport(url.as_str(), e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(IngestError::transport(url.as_str(), status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::transport(url.as_str(), e))?;

        debug!(url = %url, bytes = body.len(), "Fetched");
        Ok(body.to_vec())
    }
}

/// Parse a source locator into a URL.
pub fn parse_locator(locator: &str) -> Result<Url> {
    Url::parse(locator)
        .map_err(|e| IngestError::config(format!("Invalid locator '{}': {}", locator, e)))
}

/// `<locator>&page=<page>&per_page=<per_page>` (or `?page=` when the locator
/// has no query yet). Existing query text is kept byte for byte.
pub fn page_url(locator: &str, page: usize, per_page: usize) -> Result<Url> {
    let mut url = parse_locator(locator)?;
    url.query_pairs_mut()
        .append_pair("page", &page.to_string())
        .append_pair("per_page", &per_page.to_string());
    Ok(url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_page_url_appends_after_existing_query() {
        let url = page_url(
            "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fx%2FPostcodeArea",
            3,
            250,
        )
        .unwrap();

        assert_eq!(
            url.as_str(),
            "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fx%2FPostcodeArea&page=3&per_page=250"
        );
    }

    #[test]
    fn test_page_url_without_query() {
        let url = page_url("http://example.test/items.json", 1, 50).unwrap();
        assert_eq!(url.as_str(), "http://example.test/items.json?page=1&per_page=50");
    }

    #[test]
    fn test_bad_locator_is_configuration_error() {
        assert!(matches!(
            page_url("not a url", 1, 250),
            Err(IngestError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_non_200_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test").unwrap();
        let url = parse_locator(&format!("{}/gone.json", server.uri())).unwrap();

        match fetcher.get_bytes(&url).await {
            Err(IngestError::Transport { url: failed, message }) => {
                assert!(failed.ends_with("/gone.json"));
                assert_eq!(message, "404 Not Found");
            },
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_200_success_status_is_still_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test").unwrap();
        let url = parse_locator(&server.uri()).unwrap();

        assert!(matches!(
            fetcher.get_bytes(&url).await,
            Err(IngestError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_body_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("URN\n1\n"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), "test").unwrap();
        let url = parse_locator(&format!("{}/data.csv", server.uri())).unwrap();

        assert_eq!(fetcher.get_bytes(&url).await.unwrap(), b"URN\n1\n".to_vec());
    }
}
