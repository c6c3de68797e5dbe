//! Ingestion configuration
//!
//! Everything is read from the environment (after `.env` is loaded by the
//! binary). Source URLs and the page size are plain values handed to each
//! record source and to the fetch engine; nothing here is global state.

use govdata_common::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{IngestError, Result};

// ============================================================================
// Defaults
// ============================================================================

/// Records requested per page from paginated APIs.
pub const DEFAULT_PAGE_SIZE: usize = 250;

/// Per-request HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_USER_AGENT: &str = concat!("govdata-ingest/", env!("CARGO_PKG_VERSION"));

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_DB_NAME: &str = "datagovuk";
pub const DEFAULT_DB_SSLMODE: &str = "disable";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

pub const POSTCODE_AREA_URL: &str = "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fdata.ordnancesurvey.co.uk%2Fontology%2Fpostcode%2FPostcodeArea";
pub const POSTCODE_DISTRICT_URL: &str = "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fdata.ordnancesurvey.co.uk%2Fontology%2Fpostcode%2FPostcodeDistrict";
pub const POSTCODE_SECTOR_URL: &str = "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fdata.ordnancesurvey.co.uk%2Fontology%2Fpostcode%2FPostcodeSector";
pub const POSTCODE_UNIT_URL: &str = "http://opendatacommunities.org/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fdata.ordnancesurvey.co.uk%2Fontology%2Fpostcode%2FPostcodeUnit";
pub const EDUBASE_URL: &str = "https://s3-eu-west-1.amazonaws.com/datagovuk/edubasealldata.csv";
pub const KS4_RESULTS_URL: &str = "https://www.compare-school-performance.service.gov.uk/download-data?download=true&regions=0&filters=KS4&fileformat=csv&year=2022-2023&meta=false";
pub const DEFAULT_KS4_ACADEMIC_YEAR: &str = "2022-2023";

// ============================================================================
// Engine behavior switches
// ============================================================================

/// How the fetch engine treats a failing page once earlier pages succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationPolicy {
    /// A failed or empty page after at least one record ends pagination
    /// successfully; the failure is logged and dropped.
    #[default]
    Lenient,
    /// A failed page is always returned to the caller.
    Strict,
}

impl FromStr for TerminationPolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lenient" => Ok(TerminationPolicy::Lenient),
            "strict" => Ok(TerminationPolicy::Strict),
            other => Err(IngestError::config(format!(
                "Invalid termination policy '{}' (expected lenient or strict)",
                other
            ))),
        }
    }
}

/// How the dataset loader schedules its record sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// One source after another, in plan order
    #[default]
    Sequential,
    /// One task per source, joined at the end
    Concurrent,
}

impl FromStr for LoadMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(LoadMode::Sequential),
            "concurrent" => Ok(LoadMode::Concurrent),
            other => Err(IngestError::config(format!(
                "Invalid load mode '{}' (expected sequential or concurrent)",
                other
            ))),
        }
    }
}

// ============================================================================
// Source locations
// ============================================================================

/// Base locators for every record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrls {
    pub postcode_area: String,
    pub postcode_district: String,
    pub postcode_sector: String,
    pub postcode_unit: String,
    pub edubase: String,
    pub ks4_results: String,
    /// Academic year stamped onto exam result rows, e.g. "2022-2023"
    pub ks4_academic_year: String,
}

impl Default for SourceUrls {
    fn default() -> Self {
        Self {
            postcode_area: POSTCODE_AREA_URL.to_string(),
            postcode_district: POSTCODE_DISTRICT_URL.to_string(),
            postcode_sector: POSTCODE_SECTOR_URL.to_string(),
            postcode_unit: POSTCODE_UNIT_URL.to_string(),
            edubase: EDUBASE_URL.to_string(),
            ks4_results: KS4_RESULTS_URL.to_string(),
            ks4_academic_year: DEFAULT_KS4_ACADEMIC_YEAR.to_string(),
        }
    }
}

impl SourceUrls {
    pub fn from_env() -> Self {
        Self {
            postcode_area: env::var_or("POSTCODE_AREA_URL", POSTCODE_AREA_URL),
            postcode_district: env::var_or("POSTCODE_DISTRICT_URL", POSTCODE_DISTRICT_URL),
            postcode_sector: env::var_or("POSTCODE_SECTOR_URL", POSTCODE_SECTOR_URL),
            postcode_unit: env::var_or("POSTCODE_UNIT_URL", POSTCODE_UNIT_URL),
            edubase: env::var_or("EDUBASE_URL", EDUBASE_URL),
            ks4_results: env::var_or("KS4_RESULTS_URL", KS4_RESULTS_URL),
            ks4_academic_year: env::var_or("KS4_ACADEMIC_YEAR", DEFAULT_KS4_ACADEMIC_YEAR),
        }
    }

    /// Every postcode locator pointed at one base URL, keeping the
    /// `type_uri` filter of each resource type. Handy for mirrors and tests.
    pub fn postcodes_at(base: &str) -> Self {
        let with_type = |kind: &str| {
            format!(
                "{}/resources.json?dataset=postcodes&type_uri=http%3A%2F%2Fdata.ordnancesurvey.co.uk%2Fontology%2Fpostcode%2F{}",
                base.trim_end_matches('/'),
                kind
            )
        };
        Self {
            postcode_area: with_type("PostcodeArea"),
            postcode_district: with_type("PostcodeDistrict"),
            postcode_sector: with_type("PostcodeSector"),
            postcode_unit: with_type("PostcodeUnit"),
            ..Self::default()
        }
    }
}

// ============================================================================
// Ingestion settings
// ============================================================================

/// Fetch engine and loader settings
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub page_size: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub termination: TerminationPolicy,
    pub load_mode: LoadMode,
    pub urls: SourceUrls,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            termination: TerminationPolicy::default(),
            load_mode: LoadMode::default(),
            urls: SourceUrls::default(),
        }
    }
}

impl IngestConfig {
    /// Load from `INGEST_*` variables and the source URL overrides
    pub fn from_env() -> Result<Self> {
        let termination = match env::var_opt("INGEST_TERMINATION") {
            Some(value) => value.parse()?,
            None => TerminationPolicy::default(),
        };
        let load_mode = match env::var_opt("INGEST_LOAD_MODE") {
            Some(value) => value.parse()?,
            None => LoadMode::default(),
        };

        let config = Self {
            page_size: env::parse_or("INGEST_PAGE_SIZE", DEFAULT_PAGE_SIZE),
            http_timeout_secs: env::parse_or("INGEST_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: env::var_or("INGEST_USER_AGENT", DEFAULT_USER_AGENT),
            termination,
            load_mode,
            urls: SourceUrls::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(IngestError::config("INGEST_PAGE_SIZE must be greater than 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(IngestError::config(
                "INGEST_HTTP_TIMEOUT_SECS must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

// ============================================================================
// Database settings
// ============================================================================

/// Postgres connection settings
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Full connection URL; when present the individual parts are ignored
    pub url_override: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub name: String,
    pub ssl_mode: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DatabaseSettings {
    /// `DATABASE_URL`, or `DB_HOST`/`DB_PORT`/`DB_USER`/`DB_PASSWORD`/`DB_NAME`/`DB_SSLMODE`.
    ///
    /// `DB_USER` falls back to the login name of the current process. Without
    /// either, and without `DATABASE_URL`, this is a configuration error.
    pub fn from_env() -> Result<Self> {
        let url_override = env::var_opt("DATABASE_URL");

        let user = match env::first_var(&["DB_USER", "USER", "USERNAME"]) {
            Some(user) => user,
            None if url_override.is_some() => String::new(),
            None => return Err(IngestError::config("DB_USER is not set")),
        };

        Ok(Self {
            url_override,
            host: env::var_or("DB_HOST", DEFAULT_DB_HOST),
            port: env::parse_or("DB_PORT", DEFAULT_DB_PORT),
            user,
            password: env::var_opt("DB_PASSWORD"),
            name: env::var_or("DB_NAME", DEFAULT_DB_NAME),
            ssl_mode: env::var_or("DB_SSLMODE", DEFAULT_DB_SSLMODE),
            max_connections: env::parse_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            connect_timeout_secs: env::parse_or(
                "DB_CONNECT_TIMEOUT",
                DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            ),
        })
    }

    /// Connection URL with user and password percent-encoded.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = &self.url_override {
            return Ok(url.clone());
        }

        let invalid = |part: &str| IngestError::config(format!("Invalid database {}", part));

        let mut url = Url::parse("postgres://localhost")
            .map_err(|e| IngestError::config(e.to_string()))?;
        url.set_host(Some(&self.host))
            .map_err(|e| IngestError::config(format!("Invalid database host: {}", e)))?;
        url.set_port(Some(self.port)).map_err(|_| invalid("port"))?;
        url.set_username(&self.user).map_err(|_| invalid("user"))?;
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| invalid("password"))?;
        }
        url.set_path(&self.name);
        url.query_pairs_mut().append_pair("sslmode", &self.ssl_mode);

        Ok(url.to_string())
    }

    /// Connection URL safe to log.
    pub fn redacted_url(&self) -> String {
        let Ok(raw) = self.connection_url() else {
            return "<invalid database url>".to_string();
        };
        match Url::parse(&raw) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("****"));
                url.to_string()
            },
            Ok(url) => url.to_string(),
            Err(_) => "<unparsable database url>".to_string(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
