//! Postcode resources from opendatacommunities.org
//!
//! Four paginated JSON-LD resource types (area, district, sector, unit).
//! Each page is a JSON array of resources whose properties are arrays of
//! literals or references; parents are found in the `within` relation.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::SourceUrls;
use crate::error::Result;
use crate::linked_data::{first_id, first_value, one_or_many, parent_reference, Literal, Resource};
use crate::parse::parse_json_array;
use crate::source::{RecordBuffer, RecordSource};
use crate::store::{
    upsert_entity, ColumnDef, Entity, KeyType, NaturalKey, PageTransaction, Row, TableSchema,
    UpsertOutcome, Value,
};

const AREA_KIND: &str = "postcodearea";
const DISTRICT_KIND: &str = "postcodedistrict";
const SECTOR_KIND: &str = "postcodesector";

// ============================================================================
// Tables
// ============================================================================

pub static POSTCODE_AREAS: TableSchema = TableSchema {
    table: "postcode_areas",
    key_type: KeyType::Text,
    columns: &[ColumnDef::text("label")],
};

pub static POSTCODE_DISTRICTS: TableSchema = TableSchema {
    table: "postcode_districts",
    key_type: KeyType::Text,
    columns: &[ColumnDef::text("area_id").indexed(), ColumnDef::text("label")],
};

pub static POSTCODE_SECTORS: TableSchema = TableSchema {
    table: "postcode_sectors",
    key_type: KeyType::Text,
    columns: &[ColumnDef::text("district_id").indexed(), ColumnDef::text("label")],
};

pub static POSTCODE_UNITS: TableSchema = TableSchema {
    table: "postcode_units",
    key_type: KeyType::Text,
    columns: &[
        ColumnDef::text("sector_id").indexed(),
        ColumnDef::text("district_id").indexed(),
        ColumnDef::text("area_id").indexed(),
        ColumnDef::text("label"),
        ColumnDef::float("latitude"),
        ColumnDef::float("longitude"),
        ColumnDef::float("northing"),
        ColumnDef::float("easting"),
        ColumnDef::text("ward"),
        ColumnDef::text("district").indexed(),
        ColumnDef::text("country").indexed(),
        ColumnDef::text("county").indexed(),
    ],
};

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PostcodeArea {
    pub id: String,
    pub label: String,
}

impl Entity for PostcodeArea {
    fn schema() -> &'static TableSchema {
        &POSTCODE_AREAS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Text(self.id.clone())
    }

    fn to_row(&self) -> Row {
        Row::new(Self::schema(), self.natural_key(), vec![self.label.as_str().into()])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostcodeDistrict {
    pub id: String,
    pub area_id: String,
    pub label: String,
}

impl Entity for PostcodeDistrict {
    fn schema() -> &'static TableSchema {
        &POSTCODE_DISTRICTS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Text(self.id.clone())
    }

    fn to_row(&self) -> Row {
        Row::new(
            Self::schema(),
            self.natural_key(),
            vec![self.area_id.as_str().into(), self.label.as_str().into()],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostcodeSector {
    pub id: String,
    pub district_id: String,
    pub label: String,
}

impl Entity for PostcodeSector {
    fn schema() -> &'static TableSchema {
        &POSTCODE_SECTORS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Text(self.id.clone())
    }

    fn to_row(&self) -> Row {
        Row::new(
            Self::schema(),
            self.natural_key(),
            vec![self.district_id.as_str().into(), self.label.as_str().into()],
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostcodeUnit {
    pub id: String,
    pub sector_id: String,
    pub district_id: String,
    pub area_id: String,
    pub label: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub northing: Option<f64>,
    pub easting: Option<f64>,
    pub ward: String,
    pub district: String,
    pub country: String,
    pub county: String,
}

impl Entity for PostcodeUnit {
    fn schema() -> &'static TableSchema {
        &POSTCODE_UNITS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Text(self.id.clone())
    }

    fn to_row(&self) -> Row {
        Row::new(
            Self::schema(),
            self.natural_key(),
            vec![
                self.sector_id.as_str().into(),
                self.district_id.as_str().into(),
                self.area_id.as_str().into(),
                self.label.as_str().into(),
                Value::Float(self.latitude),
                Value::Float(self.longitude),
                Value::Float(self.northing),
                Value::Float(self.easting),
                self.ward.as_str().into(),
                self.district.as_str().into(),
                self.country.as_str().into(),
                self.county.as_str().into(),
            ],
        )
    }
}

fn first_number(literals: &[Literal]) -> Option<f64> {
    first_value(literals)
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

// ============================================================================
// Resource payloads
// ============================================================================

/// A JSON-LD resource type that maps onto one postcode entity.
pub trait PostcodeResource: DeserializeOwned + Send + Sync + 'static {
    type Entity: Entity + Send + Sync;

    const NAME: &'static str;

    fn locator(urls: &SourceUrls) -> &str;

    fn to_entity(&self) -> Self::Entity;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AreaResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "http://www.w3.org/2000/01/rdf-schema#label", default, deserialize_with = "one_or_many")]
    pub labels: Vec<Literal>,
}

impl PostcodeResource for AreaResource {
    type Entity = PostcodeArea;

    const NAME: &'static str = "postcode-areas";

    fn locator(urls: &SourceUrls) -> &str {
        &urls.postcode_area
    }

    fn to_entity(&self) -> PostcodeArea {
        PostcodeArea {
            id: self.id.clone(),
            label: first_value(&self.labels),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistrictResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "http://www.w3.org/2000/01/rdf-schema#label", default, deserialize_with = "one_or_many")]
    pub labels: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/within", default, deserialize_with = "one_or_many")]
    pub within: Vec<Resource>,
}

impl PostcodeResource for DistrictResource {
    type Entity = PostcodeDistrict;

    const NAME: &'static str = "postcode-districts";

    fn locator(urls: &SourceUrls) -> &str {
        &urls.postcode_district
    }

    fn to_entity(&self) -> PostcodeDistrict {
        PostcodeDistrict {
            id: self.id.clone(),
            area_id: parent_reference(&self.within, AREA_KIND),
            label: first_value(&self.labels),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectorResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "http://www.w3.org/2000/01/rdf-schema#label", default, deserialize_with = "one_or_many")]
    pub labels: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/within", default, deserialize_with = "one_or_many")]
    pub within: Vec<Resource>,
}

impl PostcodeResource for SectorResource {
    type Entity = PostcodeSector;

    const NAME: &'static str = "postcode-sectors";

    fn locator(urls: &SourceUrls) -> &str {
        &urls.postcode_sector
    }

    fn to_entity(&self) -> PostcodeSector {
        PostcodeSector {
            id: self.id.clone(),
            district_id: parent_reference(&self.within, DISTRICT_KIND),
            label: first_value(&self.labels),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitResource {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "http://www.w3.org/2000/01/rdf-schema#label", default, deserialize_with = "one_or_many")]
    pub labels: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/within", default, deserialize_with = "one_or_many")]
    pub within: Vec<Resource>,
    #[serde(rename = "http://www.w3.org/2003/01/geo/wgs84_pos#lat", default, deserialize_with = "one_or_many")]
    pub latitude: Vec<Literal>,
    #[serde(rename = "http://www.w3.org/2003/01/geo/wgs84_pos#long", default, deserialize_with = "one_or_many")]
    pub longitude: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/northing", default, deserialize_with = "one_or_many")]
    pub northing: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/spatialrelations/easting", default, deserialize_with = "one_or_many")]
    pub easting: Vec<Literal>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/postcode/ward", default, deserialize_with = "one_or_many")]
    pub ward: Vec<Resource>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/postcode/district", default, deserialize_with = "one_or_many")]
    pub district: Vec<Resource>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/postcode/country", default, deserialize_with = "one_or_many")]
    pub country: Vec<Resource>,
    #[serde(rename = "http://data.ordnancesurvey.co.uk/ontology/postcode/county", default, deserialize_with = "one_or_many")]
    pub county: Vec<Resource>,
}

impl PostcodeResource for UnitResource {
    type Entity = PostcodeUnit;

    const NAME: &'static str = "postcode-units";

    fn locator(urls: &SourceUrls) -> &str {
        &urls.postcode_unit
    }

    fn to_entity(&self) -> PostcodeUnit {
        PostcodeUnit {
            id: self.id.clone(),
            sector_id: parent_reference(&self.within, SECTOR_KIND),
            district_id: parent_reference(&self.within, DISTRICT_KIND),
            area_id: parent_reference(&self.within, AREA_KIND),
            label: first_value(&self.labels),
            latitude: first_number(&self.latitude),
            longitude: first_number(&self.longitude),
            northing: first_number(&self.northing),
            easting: first_number(&self.easting),
            ward: first_id(&self.ward),
            district: first_id(&self.district),
            country: first_id(&self.country),
            county: first_id(&self.county),
        }
    }
}

// ============================================================================
// Record source
// ============================================================================

/// Paginated record source over one postcode resource type
pub struct PostcodeSource<R: PostcodeResource> {
    locator: String,
    records: RecordBuffer<R>,
}

impl<R: PostcodeResource> PostcodeSource<R> {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            records: RecordBuffer::new(),
        }
    }

    pub fn from_urls(urls: &SourceUrls) -> Self {
        Self::new(R::locator(urls))
    }
}

pub type PostcodeAreaSource = PostcodeSource<AreaResource>;
pub type PostcodeDistrictSource = PostcodeSource<DistrictResource>;
pub type PostcodeSectorSource = PostcodeSource<SectorResource>;
pub type PostcodeUnitSource = PostcodeSource<UnitResource>;

#[async_trait]
impl<R: PostcodeResource> RecordSource for PostcodeSource<R> {
    fn name(&self) -> &str {
        R::NAME
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn schemas(&self) -> Vec<&'static TableSchema> {
        vec![<R::Entity as Entity>::schema()]
    }

    fn parse(&mut self, body: &[u8]) -> Result<usize> {
        Ok(self.records.replace(parse_json_array(body)?))
    }

    async fn persist_at(
        &self,
        tx: &mut dyn PageTransaction,
        position: usize,
    ) -> Result<UpsertOutcome> {
        let entity = self.records.at(position)?.to_entity();
        upsert_entity(tx, &entity).await
    }
}
