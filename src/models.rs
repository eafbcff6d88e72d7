use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "student")]
    Student,
    #[serde(rename = "staffFaculty")]
    StaffFaculty,
    #[serde(rename = "community")]
    Community,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Student,
        Collection::StaffFaculty,
        Collection::Community,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Student => "student",
            Collection::StaffFaculty => "staffFaculty",
            Collection::Community => "community",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let key: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "student" | "students" => Ok(Collection::Student),
            "stafffaculty" | "staff" | "faculty" => Ok(Collection::StaffFaculty),
            "community" => Ok(Collection::Community),
            _ => Err(format!("unknown collection `{value}`")),
        }
    }
}

/// A document as returned by the store: an opaque id plus an untyped body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: String,
    #[serde(default)]
    pub body: Map<String, Value>,
}

impl RawDocument {
    pub fn new(id: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            body,
        }
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|key| self.body.get(*key).and_then(coerce_text))
    }
}

/// Renders a JSON scalar as text. Null, arrays and objects are treated as absent.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantRecord {
    pub id: String,
    pub collection: Collection,
    pub full_name: Option<String>,
    pub id_number: Option<String>,
    pub sex: Option<String>,
    pub age: Option<String>,
    pub ethnic_group: Option<String>,
    pub ethnic_group_other: Option<String>,
    pub religion: Option<String>,
    pub orientation: Option<String>,
    pub address: Option<String>,
    pub school: Option<String>,
    pub program: Option<String>,
    pub year_level: Option<String>,
    pub section: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub archived: bool,
}

impl ParticipantRecord {
    /// An empty record with only identity set; every attribute absent.
    #[cfg(test)]
    pub fn blank(id: impl Into<String>, collection: Collection) -> Self {
        Self {
            id: id.into(),
            collection,
            full_name: None,
            id_number: None,
            sex: None,
            age: None,
            ethnic_group: None,
            ethnic_group_other: None,
            religion: None,
            orientation: None,
            address: None,
            school: None,
            program: None,
            year_level: None,
            section: None,
            created_at: None,
            archived: false,
        }
    }

    pub fn from_document(collection: Collection, document: &RawDocument) -> Self {
        let full_name = document.text(&["fullName", "full_name", "name"]).or_else(|| {
            let parts: Vec<String> = ["firstName", "middleName", "lastName"]
                .iter()
                .filter_map(|key| document.text(&[*key]))
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        });

        Self {
            id: document.id.clone(),
            collection,
            full_name,
            id_number: document.text(&["idNumber", "id_number", "studentId", "employeeId"]),
            sex: document.text(&["sex", "gender"]),
            age: document.text(&["age"]),
            ethnic_group: document.text(&["ethnicGroup", "ethnic_group", "ethnicity"]),
            ethnic_group_other: document.text(&["otherEthnicGroup", "ethnic_group_other"]),
            religion: document.text(&["religion"]),
            orientation: document.text(&["orientation", "sexualOrientation"]),
            address: document.text(&["address", "homeAddress"]),
            school: document.text(&["school", "department"]),
            program: document.text(&["program", "course"]),
            year_level: document.text(&["yearLevel", "year_level", "year"]),
            section: document.text(&["section"]),
            created_at: document
                .text(&["createdAt", "$createdAt", "created_at"])
                .as_deref()
                .and_then(parse_timestamp),
            archived: document
                .text(&["archived", "isArchived"])
                .as_deref()
                .map(normalize::parse_flag)
                .unwrap_or(false),
        }
    }
}

/// Drops archived records unless `include_archived` is set; returns how many were dropped.
pub fn exclude_archived(records: &mut Vec<ParticipantRecord>, include_archived: bool) -> usize {
    if include_archived {
        return 0;
    }
    let before = records.len();
    records.retain(|record| !record.archived);
    before - records.len()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(body: Value) -> RawDocument {
        match body {
            Value::Object(map) => RawDocument::new("doc-1", map),
            _ => RawDocument::new("doc-1", Map::new()),
        }
    }

    #[test]
    fn coerces_non_string_scalars() {
        let record = ParticipantRecord::from_document(
            Collection::Student,
            &document(json!({ "age": 20, "sex": null, "archived": true, "religion": ["x"] })),
        );
        assert_eq!(record.age.as_deref(), Some("20"));
        assert_eq!(record.sex, None);
        assert_eq!(record.religion, None);
        assert!(record.archived);
    }

    #[test]
    fn assembles_name_from_parts() {
        let record = ParticipantRecord::from_document(
            Collection::Community,
            &document(json!({ "firstName": "Ana", "lastName": " Reyes " })),
        );
        assert_eq!(record.full_name.as_deref(), Some("Ana Reyes"));
    }

    #[test]
    fn parses_timestamps() {
        let record = ParticipantRecord::from_document(
            Collection::StaffFaculty,
            &document(json!({ "createdAt": "2025-06-01T08:30:00.000+00:00" })),
        );
        assert!(record.created_at.is_some());

        let dated = ParticipantRecord::from_document(
            Collection::StaffFaculty,
            &document(json!({ "createdAt": "2025-06-01" })),
        );
        assert!(dated.created_at.is_some());
    }

    #[test]
    fn archived_records_are_excluded_unless_requested() {
        let population = || {
            vec![
                ParticipantRecord::from_document(
                    Collection::Community,
                    &RawDocument::new("a", json!({ "archived": "yes" }).as_object().cloned().unwrap()),
                ),
                ParticipantRecord::from_document(
                    Collection::Community,
                    &RawDocument::new("b", json!({ "archived": "no" }).as_object().cloned().unwrap()),
                ),
            ]
        };

        let mut active = population();
        assert_eq!(exclude_archived(&mut active, false), 1);
        assert_eq!(active.iter().map(|record| record.id.as_str()).collect::<Vec<_>>(), vec!["b"]);

        let mut everyone = population();
        assert_eq!(exclude_archived(&mut everyone, true), 0);
        assert_eq!(everyone.len(), 2);
    }

    #[test]
    fn collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>(), Ok(collection));
        }
        assert_eq!("staff-faculty".parse::<Collection>(), Ok(Collection::StaffFaculty));
        assert!("alumni".parse::<Collection>().is_err());
    }
}
