use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use diesel::sql_types::{BigInt, Bool, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::messages::{ContactRef, FlowRef};

/// Path entries beyond this are dropped from the archived record
pub const PATH_CAP: usize = 500;

/// Decode a single-letter exit type code
pub fn decode_exit_type(code: &str) -> Option<&'static str> {
    match code {
        "C" => Some("completed"),
        "I" => Some("interrupted"),
        "E" => Some("expired"),
        "F" => Some("failed"),
        _ => None,
    }
}

/// Whether a run status code means the run is still active or waiting.
/// Such runs must never be archived or deleted; the exporter and the deleter
/// both check through here.
pub fn is_active_run_status(code: &str) -> bool {
    matches!(code, "A" | "W")
}

/// One flow run row as returned by the export query
#[derive(Debug, diesel::QueryableByName)]
pub struct RunExportRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = SqlUuid)]
    pub uuid: Uuid,
    #[diesel(sql_type = Nullable<SqlUuid>)]
    pub flow_uuid: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    pub flow_name: Option<String>,
    #[diesel(sql_type = SqlUuid)]
    pub contact_uuid: Uuid,
    #[diesel(sql_type = Nullable<Text>)]
    pub contact_name: Option<String>,
    #[diesel(sql_type = Bool)]
    pub responded: bool,
    #[diesel(sql_type = Nullable<Text>)]
    pub path: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub results: Option<String>,
    #[diesel(sql_type = Timestamptz)]
    pub created_on: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    pub modified_on: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub exited_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Nullable<Text>)]
    pub exit_type: Option<String>,
    #[diesel(sql_type = Text)]
    pub status: String,
}

/// Path step as stored in the operational row
#[derive(Debug, Deserialize)]
struct RawPathStep {
    node_uuid: Option<Uuid>,
    arrived_on: Option<DateTime<Utc>>,
}

/// Result entry as stored in the operational row, keyed by result slug
#[derive(Debug, Deserialize)]
struct RawResult {
    name: Option<String>,
    value: Option<String>,
    input: Option<String>,
    category: Option<String>,
    node_uuid: Option<Uuid>,
    created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub node: Option<Uuid>,
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultValue {
    pub name: Option<String>,
    pub value: Option<String>,
    pub input: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub node: Option<Uuid>,
}

/// A flow run as it appears in an archive, one JSON object per line
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub uuid: Uuid,
    pub flow: Option<FlowRef>,
    pub contact: ContactRef,
    pub responded: bool,
    pub path: Vec<PathStep>,
    pub values: BTreeMap<String, ResultValue>,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    pub exited_on: Option<DateTime<Utc>>,
    pub exit_type: Option<&'static str>,
}

impl RunRecord {
    /// Shape an export row. Fails when the run is still active or when the
    /// stored path/results JSON cannot be parsed.
    pub fn from_row(row: RunExportRow) -> Result<RunRecord> {
        if is_active_run_status(&row.status) {
            bail!(
                "run {} has active status {}, cannot archive interval with active runs",
                row.id,
                row.status
            );
        }

        let path = match row.path.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => {
                let steps: Vec<RawPathStep> = serde_json::from_str(raw)
                    .with_context(|| format!("invalid path on run {}", row.id))?;
                steps
                    .into_iter()
                    .take(PATH_CAP)
                    .map(|s| PathStep {
                        node: s.node_uuid,
                        time: s.arrived_on,
                    })
                    .collect()
            }
        };

        let values = match row.results.as_deref() {
            None | Some("") => BTreeMap::new(),
            Some(raw) => {
                let results: BTreeMap<String, RawResult> = serde_json::from_str(raw)
                    .with_context(|| format!("invalid results on run {}", row.id))?;
                results
                    .into_iter()
                    .map(|(slug, r)| {
                        (
                            slug,
                            ResultValue {
                                name: r.name,
                                value: r.value,
                                input: r.input,
                                time: r.created_on,
                                category: r.category,
                                node: r.node_uuid,
                            },
                        )
                    })
                    .collect()
            }
        };

        Ok(RunRecord {
            id: row.id,
            uuid: row.uuid,
            flow: row.flow_uuid.map(|uuid| FlowRef {
                uuid,
                name: row.flow_name,
            }),
            contact: ContactRef {
                uuid: row.contact_uuid,
                name: row.contact_name,
            },
            responded: row.responded,
            path,
            values,
            created_on: row.created_on,
            modified_on: row.modified_on,
            exited_on: row.exited_on,
            exit_type: row.exit_type.as_deref().and_then(decode_exit_type),
        })
    }
}
