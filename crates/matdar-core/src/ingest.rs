//! Decoding of record batches from the ingestion shape.
//!
//! The ingestion service and the remote store both hand over JSON arrays of
//! loosely shaped objects: keys vary between exports (`voterId`, `epic`,
//! `EPIC No`), numbers arrive as strings and vice versa. Each object is read
//! field by field into a [`RawRecord`], so one unusable value never costs the
//! rest of the record; [`decode_batch`] turns a batch into canonical
//! [`Record`]s.
//!
//! No record is ever dropped. Missing required fields become empty strings
//! and, together with values of the wrong shape, are reported as
//! [`MatdarError::MalformedRecord`] diagnostics.

use crate::error::{ErrorKind, MatdarError, Result};
use crate::types::{Record, RecordId, SupportStatus, SurveyRecord};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A scalar that may arrive as text or as a number
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    /// Read a JSON value; arrays, objects and null are not scalars
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Scalar::Int(i)),
                None => n.as_f64().map(Scalar::Float),
            },
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Text form, trimmed; `None` when blank
    pub fn text(&self) -> Option<String> {
        let s = match self {
            Scalar::Text(s) => s.trim().to_string(),
            Scalar::Int(n) => n.to_string(),
            Scalar::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            Scalar::Float(f) => f.to_string(),
            Scalar::Bool(b) => b.to_string(),
        };
        (!s.is_empty()).then_some(s)
    }

    /// Numeric form for small non-negative integers (ages)
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Scalar::Int(n) => u16::try_from(*n).ok(),
            Scalar::Float(f) if *f >= 0.0 && *f <= f64::from(u16::MAX) => Some(*f as u16),
            Scalar::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

fn text(field: &Option<Scalar>) -> Option<String> {
    field.as_ref().and_then(Scalar::text)
}

// Accepted keys per field, in priority order. The voter ID card number is
// preferred over a generic document `id`.
const ID: &[&str] = &["voterId", "voter_id", "epic", "EPIC", "EPIC No", "id"];
const SERIAL: &[&str] = &["serial", "serialNo", "serial_no", "srNo", "Sr No"];
const NAME: &[&str] = &["name", "Name", "fullName", "full_name"];
const AGE: &[&str] = &["age", "Age"];
const GENDER: &[&str] = &["gender", "Gender", "sex"];
const BOOTH: &[&str] = &[
    "booth",
    "boothNo",
    "booth_no",
    "boothNumber",
    "part_no",
    "partNo",
];
const POLLING_STATION: &[&str] = &["polling_station", "pollingStation", "pollingAddress"];
const WARD: &[&str] = &["ward", "Ward", "wardName", "prabhag"];
const SECTION_ADDRESS: &[&str] = &[
    "section_address",
    "sectionAddress",
    "address",
    "listAddress",
];
const FATHER_NAME: &[&str] = &[
    "father_name",
    "fatherName",
    "relativeName",
    "relative_name",
];
const PHONE: &[&str] = &["phone", "mobile", "Phone", "phoneNumber"];

const SURVEY_ADDRESS: &[&str] = &["address", "surveyAddress", "address_override"];
const AFFILIATION: &[&str] = &["political_affiliation", "politicalAffiliation", "party"];
const SUPPORT: &[&str] = &["support", "supportStatus", "support_status"];
const ASSIGNED_TO: &[&str] = &["assigned_to", "assignedTo", "assigned_worker", "karyakarta"];

/// Field-by-field reader over one JSON object.
///
/// Collects the names of fields whose value was present but unusable.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    invalid: &'a mut Vec<&'static str>,
}

impl Fields<'_> {
    /// The first key holding a non-blank scalar wins; earlier keys with
    /// unusable values are still reported
    fn scalar(&mut self, field: &'static str, keys: &[&str]) -> Option<Scalar> {
        let mut rejected = false;
        for value in keys.iter().filter_map(|key| self.map.get(*key)) {
            if value.is_null() {
                continue;
            }
            match Scalar::from_value(value) {
                Some(scalar) if scalar.text().is_some() => {
                    if rejected {
                        self.invalid.push(field);
                    }
                    return Some(scalar);
                }
                Some(_) => {}
                None => rejected = true,
            }
        }
        if rejected {
            self.invalid.push(field);
        }
        None
    }
}

/// Survey sub-record as it arrives on the wire
#[derive(Debug, Clone, Default)]
pub struct RawSurvey {
    pub address: Option<Scalar>,
    pub income: Option<Scalar>,
    pub education: Option<Scalar>,
    pub occupation: Option<Scalar>,
    pub caste: Option<Scalar>,
    pub political_affiliation: Option<Scalar>,
    pub issues: Vec<String>,
    pub support: Option<Scalar>,
    pub assigned_to: Option<Scalar>,
}

impl RawSurvey {
    fn from_map(map: &Map<String, Value>, invalid: &mut Vec<&'static str>) -> Self {
        let issues = match map.get("issues") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                invalid.push("survey.issues");
                Vec::new()
            }
        };

        let mut fields = Fields { map, invalid };
        RawSurvey {
            address: fields.scalar("survey.address", SURVEY_ADDRESS),
            income: fields.scalar("survey.income", &["income"]),
            education: fields.scalar("survey.education", &["education"]),
            occupation: fields.scalar("survey.occupation", &["occupation"]),
            caste: fields.scalar("survey.caste", &["caste"]),
            political_affiliation: fields.scalar("survey.political_affiliation", AFFILIATION),
            issues,
            support: fields.scalar("survey.support", SUPPORT),
            assigned_to: fields.scalar("survey.assigned_to", ASSIGNED_TO),
        }
    }

    fn into_survey(self) -> SurveyRecord {
        SurveyRecord {
            address: text(&self.address),
            income: text(&self.income),
            education: text(&self.education),
            occupation: text(&self.occupation),
            caste: text(&self.caste),
            political_affiliation: text(&self.political_affiliation),
            issues: self.issues,
            support: text(&self.support)
                .map(|s| SupportStatus::parse(&s))
                .unwrap_or_default(),
            assigned_to: text(&self.assigned_to),
        }
    }
}

/// One record as it arrives on the wire. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub id: Option<Scalar>,
    pub serial: Option<Scalar>,
    pub name: Option<Scalar>,
    pub age: Option<Scalar>,
    pub gender: Option<Scalar>,
    pub booth: Option<Scalar>,
    pub polling_station: Option<Scalar>,
    pub ward: Option<Scalar>,
    pub section_address: Option<Scalar>,
    pub father_name: Option<Scalar>,
    pub phone: Option<Scalar>,
    pub survey: Option<RawSurvey>,

    /// Fields that were present with a value of the wrong shape
    pub invalid: Vec<&'static str>,
}

/// Required fields checked during conversion
const REQUIRED: [&str; 3] = ["id", "name", "booth"];

impl RawRecord {
    /// Read one batch element.
    ///
    /// Anything that is not an object yields an empty record. Unknown keys
    /// are ignored; values that cannot be used are skipped and named in
    /// [`RawRecord::invalid`].
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return RawRecord::default();
        };

        let mut invalid = Vec::new();
        let survey = match map.get("survey") {
            Some(Value::Object(survey)) => Some(RawSurvey::from_map(survey, &mut invalid)),
            None | Some(Value::Null) => None,
            Some(_) => {
                invalid.push("survey");
                None
            }
        };

        let mut fields = Fields {
            map,
            invalid: &mut invalid,
        };
        let mut raw = RawRecord {
            id: fields.scalar("id", ID),
            serial: fields.scalar("serial", SERIAL),
            name: fields.scalar("name", NAME),
            age: fields.scalar("age", AGE),
            gender: fields.scalar("gender", GENDER),
            booth: fields.scalar("booth", BOOTH),
            polling_station: fields.scalar("polling_station", POLLING_STATION),
            ward: fields.scalar("ward", WARD),
            section_address: fields.scalar("section_address", SECTION_ADDRESS),
            father_name: fields.scalar("father_name", FATHER_NAME),
            phone: fields.scalar("phone", PHONE),
            survey,
            invalid: Vec::new(),
        };
        raw.invalid = invalid;
        raw
    }

    /// Convert to a canonical record.
    ///
    /// Returns the record and the list of required fields that were absent.
    /// A missing identifier is replaced by [`RecordId::synthetic`].
    pub fn into_record(self, batch: &str, position: usize) -> (Record, Vec<&'static str>) {
        let mut missing = Vec::new();

        let id = match text(&self.id) {
            Some(id) => RecordId::new(id),
            None => {
                missing.push(REQUIRED[0]);
                RecordId::synthetic(batch, position)
            }
        };
        let name = text(&self.name).unwrap_or_else(|| {
            missing.push(REQUIRED[1]);
            String::new()
        });
        let booth = text(&self.booth).unwrap_or_else(|| {
            missing.push(REQUIRED[2]);
            String::new()
        });

        let record = Record {
            id,
            serial_no: text(&self.serial).unwrap_or_default(),
            name,
            age: self.age.as_ref().and_then(Scalar::as_u16),
            gender: text(&self.gender).unwrap_or_default(),
            booth,
            polling_station: text(&self.polling_station).unwrap_or_default(),
            ward: text(&self.ward).unwrap_or_default(),
            section_address: text(&self.section_address).unwrap_or_default(),
            father_name: text(&self.father_name).unwrap_or_default(),
            phone: text(&self.phone).unwrap_or_default(),
            survey: self.survey.map(RawSurvey::into_survey),
        };

        (record, missing)
    }
}

/// Outcome of decoding one batch.
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Canonical records in input order
    pub records: Vec<Record>,

    /// One `MalformedRecord` error per record with missing required fields
    /// or unusable values
    pub malformed: Vec<MatdarError>,

    /// Positions that received a synthetic identifier
    pub synthetic_ids: usize,

    /// Identifiers that occur more than once in the batch
    pub duplicate_ids: Vec<RecordId>,
}

impl ImportReport {
    /// Whether every record was complete and identifiers were unique
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty() && self.duplicate_ids.is_empty()
    }

    /// Convert raw records, in order, into canonical records.
    pub fn from_raw(raw: Vec<RawRecord>, batch: &str) -> Self {
        let mut report = ImportReport {
            records: Vec::with_capacity(raw.len()),
            ..Default::default()
        };
        let mut seen: HashMap<RecordId, usize> = HashMap::with_capacity(raw.len());

        for (position, mut raw) in raw.into_iter().enumerate() {
            let invalid = std::mem::take(&mut raw.invalid);
            let (record, missing) = raw.into_record(batch, position);
            if record.id.is_synthetic() {
                report.synthetic_ids += 1;
            }
            if !missing.is_empty() || !invalid.is_empty() {
                debug!(position, ?missing, ?invalid, "Record is incomplete");
                report.malformed.push(MatdarError::MalformedRecord {
                    position,
                    missing,
                    invalid,
                });
            }
            let count = seen.entry(record.id.clone()).or_insert(0);
            *count += 1;
            if *count == 2 {
                report.duplicate_ids.push(record.id.clone());
            }
            report.records.push(record);
        }

        if !report.is_clean() {
            warn!(
                batch,
                records = report.records.len(),
                malformed = report.malformed.len(),
                synthetic_ids = report.synthetic_ids,
                duplicates = report.duplicate_ids.len(),
                "Imported batch with defects"
            );
        }

        report
    }
}

/// Decode a JSON batch.
///
/// Accepts either a bare array of records or an object wrapping the array in
/// a `records`, `voters` or `data` field. Elements that are not objects are
/// kept as empty, malformed records so positions stay stable.
///
/// Fails only when the batch as a whole is not JSON or not a list.
pub fn decode_batch(bytes: &[u8], batch: &str) -> Result<ImportReport> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => {
            match ["records", "voters", "data"]
                .iter()
                .find_map(|key| map.remove(*key))
            {
                Some(serde_json::Value::Array(items)) => items,
                _ => {
                    return Err(MatdarError::serialization(
                        "expected an array of records or an object with a records array",
                    ))
                }
            }
        }
        _ => {
            return Err(MatdarError::serialization(
                "expected an array of records",
            ))
        }
    };

    let raw: Vec<RawRecord> = items.iter().map(RawRecord::from_value).collect();

    Ok(ImportReport::from_raw(raw, batch))
}

/// Count diagnostics of a given kind in a report
pub fn count_kind(report: &ImportReport, kind: ErrorKind) -> usize {
    report
        .malformed
        .iter()
        .filter(|e| e.kind() == Some(kind))
        .count()
}
