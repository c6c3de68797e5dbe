//! Schools from the EduBase bulk export
//!
//! One CSV file with a header row; every data row yields the school and the
//! local authority it belongs to.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::error::Result;
use crate::parse::{parse_csv, CsvRecord};
use crate::source::{RecordBuffer, RecordSource};
use crate::store::{
    upsert_entity, ColumnDef, Entity, KeyType, NaturalKey, PageTransaction, Row, TableSchema,
    UpsertOutcome, Value,
};

pub static LOCAL_AUTHORITIES: TableSchema = TableSchema {
    table: "local_authorities",
    key_type: KeyType::Int,
    columns: &[ColumnDef::text("name")],
};

pub static SCHOOLS: TableSchema = TableSchema {
    table: "schools",
    key_type: KeyType::Int,
    columns: &[
        ColumnDef::int("local_authority_id").indexed(),
        ColumnDef::int("establishment_number"),
        ColumnDef::text("establishment_name"),
        ColumnDef::text("establishment_type"),
        ColumnDef::text("establishment_status"),
        ColumnDef::text("establishment_reason_opened"),
        ColumnDef::date("open_date"),
        ColumnDef::date("close_date"),
        ColumnDef::text("phase_of_education"),
        ColumnDef::int("statutory_low_age"),
        ColumnDef::int("statutory_high_age"),
        ColumnDef::text("boarders"),
        ColumnDef::text("official_sixth_form"),
        ColumnDef::text("gender"),
        ColumnDef::text("religious_character"),
        ColumnDef::text("diocese"),
        ColumnDef::text("admissions_policy"),
        ColumnDef::int("school_capacity"),
        ColumnDef::text("special_classes"),
        ColumnDef::text("further_education_type"),
        ColumnDef::text("ofsted_special_measures"),
        ColumnDef::date("last_changed_date"),
        ColumnDef::text("street"),
        ColumnDef::text("locality"),
        ColumnDef::text("address3"),
        ColumnDef::text("town"),
        ColumnDef::text("county"),
        ColumnDef::text("postcode").indexed(),
        ColumnDef::text("school_website"),
        ColumnDef::text("telephone_num"),
        ColumnDef::text("head_title"),
        ColumnDef::text("head_first_name"),
        ColumnDef::text("head_last_name"),
        ColumnDef::text("head_honours"),
        ColumnDef::text("head_preferred_job_title"),
        ColumnDef::text("gor"),
        ColumnDef::text("administrative_ward"),
        ColumnDef::text("parliamentary_constituency"),
        ColumnDef::text("urban_rural"),
        ColumnDef::text("gss_la_code"),
        ColumnDef::int("easting"),
        ColumnDef::int("northing"),
        ColumnDef::text("msoa"),
        ColumnDef::text("lsoa"),
        ColumnDef::text("boarding_establishment"),
        ColumnDef::int("previous_la"),
        ColumnDef::text("previous_la_name"),
        ColumnDef::int("previous_establishment_number"),
    ],
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAuthority {
    pub id: i64,
    pub name: String,
}

impl Entity for LocalAuthority {
    fn schema() -> &'static TableSchema {
        &LOCAL_AUTHORITIES
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Int(self.id)
    }

    fn to_row(&self) -> Row {
        Row::new(Self::schema(), self.natural_key(), vec![self.name.as_str().into()])
    }
}

/// One establishment, keyed by its URN
#[derive(Debug, Clone, PartialEq, Default)]
pub struct School {
    pub id: i64,
    pub local_authority_id: Option<i64>,
    pub establishment_number: Option<i64>,
    pub establishment_name: String,
    pub establishment_type: String,
    pub establishment_status: String,
    pub establishment_reason_opened: String,
    pub open_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
    pub phase_of_education: String,
    pub statutory_low_age: Option<i64>,
    pub statutory_high_age: Option<i64>,
    pub boarders: String,
    pub official_sixth_form: String,
    pub gender: String,
    pub religious_character: String,
    pub diocese: String,
    pub admissions_policy: String,
    pub school_capacity: Option<i64>,
    pub special_classes: String,
    pub further_education_type: String,
    pub ofsted_special_measures: String,
    pub last_changed_date: Option<NaiveDate>,
    pub street: String,
    pub locality: String,
    pub address3: String,
    pub town: String,
    pub county: String,
    pub postcode: String,
    pub school_website: String,
    pub telephone_num: String,
    pub head_title: String,
    pub head_first_name: String,
    pub head_last_name: String,
    pub head_honours: String,
    pub head_preferred_job_title: String,
    pub gor: String,
    pub administrative_ward: String,
    pub parliamentary_constituency: String,
    pub urban_rural: String,
    pub gss_la_code: String,
    pub easting: Option<i64>,
    pub northing: Option<i64>,
    pub msoa: String,
    pub lsoa: String,
    pub boarding_establishment: String,
    pub previous_la: Option<i64>,
    pub previous_la_name: String,
    pub previous_establishment_number: Option<i64>,
}

impl School {
    /// Map an EduBase row. Unparsable numbers and dates become `None`.
    pub fn from_record(id: i64, local_authority_id: Option<i64>, record: &CsvRecord) -> Self {
        let text = |column: &str| record.get(column).to_string();

        Self {
            id,
            local_authority_id,
            establishment_number: record.int("EstablishmentNumber"),
            establishment_name: text("EstablishmentName"),
            establishment_type: text("TypeOfEstablishment (name)"),
            establishment_status: text("EstablishmentStatus (name)"),
            establishment_reason_opened: text("ReasonEstablishmentOpened (name)"),
            open_date: record.date("OpenDate"),
            close_date: record.date("CloseDate"),
            phase_of_education: text("PhaseOfEducation (name)"),
            statutory_low_age: record.int("StatutoryLowAge"),
            statutory_high_age: record.int("StatutoryHighAge"),
            boarders: text("Boarders (name)"),
            official_sixth_form: text("OfficialSixthForm (name)"),
            gender: text("Gender (name)"),
            religious_character: text("ReligiousCharacter (name)"),
            diocese: text("Diocese (name)"),
            admissions_policy: text("AdmissionsPolicy (name)"),
            school_capacity: record.int("SchoolCapacity"),
            special_classes: text("SpecialClasses (name)"),
            further_education_type: text("FurtherEducationType (name)"),
            ofsted_special_measures: text("OfstedSpecialMeasures (name)"),
            last_changed_date: record.date("LastChangedDate"),
            street: text("Street"),
            locality: text("Locality"),
            address3: text("Address3"),
            town: text("Town"),
            county: text("County (name)"),
            postcode: text("Postcode"),
            school_website: text("SchoolWebsite"),
            telephone_num: text("TelephoneNum"),
            head_title: text("HeadTitle (name)"),
            head_first_name: text("HeadFirstName"),
            head_last_name: text("HeadLastName"),
            head_honours: text("HeadHonours"),
            head_preferred_job_title: text("HeadPreferredJobTitle"),
            gor: text("GOR (name)"),
            administrative_ward: text("AdministrativeWard (name)"),
            parliamentary_constituency: text("ParliamentaryConstituency (name)"),
            urban_rural: text("UrbanRural (name)"),
            gss_la_code: text("GSSLACode (name)"),
            easting: record.int("Easting"),
            northing: record.int("Northing"),
            msoa: text("MSOA (name)"),
            lsoa: text("LSOA (name)"),
            boarding_establishment: text("BoardingEstablishment (name)"),
            previous_la: record.int("PreviousLA (code)"),
            previous_la_name: text("PreviousLA (name)"),
            previous_establishment_number: record.int("PreviousEstablishmentNumber"),
        }
    }
}

impl Entity for School {
    fn schema() -> &'static TableSchema {
        &SCHOOLS
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::Int(self.id)
    }

    fn to_row(&self) -> Row {
        let text = |value: &String| Value::Text(value.clone());

        Row::new(
            Self::schema(),
            self.natural_key(),
            vec![
                Value::Int(self.local_authority_id),
                Value::Int(self.establishment_number),
                text(&self.establishment_name),
                text(&self.establishment_type),
                text(&self.establishment_status),
                text(&self.establishment_reason_opened),
                Value::Date(self.open_date),
                Value::Date(self.close_date),
                text(&self.phase_of_education),
                Value::Int(self.statutory_low_age),
                Value::Int(self.statutory_high_age),
                text(&self.boarders),
                text(&self.official_sixth_form),
                text(&self.gender),
                text(&self.religious_character),
                text(&self.diocese),
                text(&self.admissions_policy),
                Value::Int(self.school_capacity),
                text(&self.special_classes),
                text(&self.further_education_type),
                text(&self.ofsted_special_measures),
                Value::Date(self.last_changed_date),
                text(&self.street),
                text(&self.locality),
                text(&self.address3),
                text(&self.town),
                text(&self.county),
                text(&self.postcode),
                text(&self.school_website),
                text(&self.telephone_num),
                text(&self.head_title),
                text(&self.head_first_name),
                text(&self.head_last_name),
                text(&self.head_honours),
                text(&self.head_preferred_job_title),
                text(&self.gor),
                text(&self.administrative_ward),
                text(&self.parliamentary_constituency),
                text(&self.urban_rural),
                text(&self.gss_la_code),
                Value::Int(self.easting),
                Value::Int(self.northing),
                text(&self.msoa),
                text(&self.lsoa),
                text(&self.boarding_establishment),
                Value::Int(self.previous_la),
                text(&self.previous_la_name),
                Value::Int(self.previous_establishment_number),
            ],
        )
    }
}

/// Bulk record source over the EduBase CSV
pub struct SchoolSource {
    locator: String,
    records: RecordBuffer<CsvRecord>,
}

impl SchoolSource {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            records: RecordBuffer::new(),
        }
    }
}

#[async_trait]
impl RecordSource for SchoolSource {
    fn name(&self) -> &str {
        "schools"
    }

    fn locator(&self) -> &str {
        &self.locator
    }

    fn schemas(&self) -> Vec<&'static TableSchema> {
        vec![&LOCAL_AUTHORITIES, &SCHOOLS]
    }

    fn parse(&mut self, body: &[u8]) -> Result<usize> {
        Ok(self.records.replace(parse_csv(body)?))
    }

    async fn persist_at(
        &self,
        tx: &mut dyn PageTransaction,
        position: usize,
    ) -> Result<UpsertOutcome> {
        let record = self.records.at(position)?;

        let local_authority_id = match record.int("LA (code)") {
            Some(id) => {
                let authority = LocalAuthority {
                    id,
                    name: record.get("LA (name)").to_string(),
                };
                upsert_entity(tx, &authority).await?;
                Some(id)
            },
            None => {
                warn!(position, code = record.get("LA (code)"), "Invalid local authority code");
                None
            },
        };

        let Some(urn) = record.int("URN") else {
            warn!(position, urn = record.get("URN"), "Invalid URN, skipping row");
            return Ok(UpsertOutcome::Skipped);
        };

        let school = School::from_record(urn, local_authority_id, record);
        upsert_entity(tx, &school).await
    }
}
