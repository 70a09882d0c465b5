use chrono::{DateTime, Utc};
use diesel::sql_types::{Array, BigInt, Jsonb, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use serde::Serialize;
use uuid::Uuid;

/// Decode a single-letter direction code
pub fn decode_direction(code: &str) -> Option<&'static str> {
    match code {
        "I" => Some("in"),
        "O" => Some("out"),
        _ => None,
    }
}

/// Decode a single-letter message type code
pub fn decode_msg_type(code: &str) -> Option<&'static str> {
    match code {
        "T" => Some("text"),
        "O" => Some("optin"),
        "V" => Some("voice"),
        _ => None,
    }
}

/// Decode a single-letter status code
pub fn decode_status(code: &str) -> Option<&'static str> {
    match code {
        "I" => Some("initializing"),
        "P" => Some("pending"),
        "Q" => Some("queued"),
        "W" => Some("wired"),
        "S" => Some("sent"),
        "D" => Some("delivered"),
        "H" => Some("handled"),
        "E" => Some("errored"),
        "F" => Some("failed"),
        "R" => Some("resent"),
        _ => None,
    }
}

/// Decode a single-letter visibility code. The exporter and the deleter both
/// go through this table; the two deletion codes collapse to one word.
pub fn decode_visibility(code: &str) -> Option<&'static str> {
    match code {
        "V" => Some("visible"),
        "A" => Some("archived"),
        "D" | "X" => Some("deleted"),
        _ => None,
    }
}

/// Whether a visibility code means the row is excluded from exports
pub fn is_deleted_visibility(code: &str) -> bool {
    decode_visibility(code) == Some("deleted")
}

/// One message row as returned by the export query, label aggregate included
#[derive(Debug, diesel::QueryableByName)]
pub struct MessageExportRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub broadcast_id: Option<i64>,
    #[diesel(sql_type = SqlUuid)]
    pub contact_uuid: Uuid,
    #[diesel(sql_type = Nullable<Text>)]
    pub contact_name: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    pub urn_identity: Option<String>,
    #[diesel(sql_type = Nullable<SqlUuid>)]
    pub channel_uuid: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    pub channel_name: Option<String>,
    #[diesel(sql_type = Nullable<SqlUuid>)]
    pub flow_uuid: Option<Uuid>,
    #[diesel(sql_type = Nullable<Text>)]
    pub flow_name: Option<String>,
    #[diesel(sql_type = Text)]
    pub direction: String,
    #[diesel(sql_type = Text)]
    pub msg_type: String,
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = Text)]
    pub visibility: String,
    #[diesel(sql_type = Text)]
    pub text: String,
    #[diesel(sql_type = Nullable<Array<Text>>)]
    pub attachments: Option<Vec<String>>,
    #[diesel(sql_type = Jsonb)]
    pub labels: serde_json::Value,
    #[diesel(sql_type = Timestamptz)]
    pub created_on: DateTime<Utc>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub sent_on: Option<DateTime<Utc>>,
    #[diesel(sql_type = Timestamptz)]
    pub modified_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactRef {
    pub uuid: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelRef {
    pub uuid: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowRef {
    pub uuid: Uuid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub content_type: String,
    pub url: String,
}

/// A message as it appears in an archive, one JSON object per line
#[derive(Debug, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub broadcast: Option<i64>,
    pub contact: ContactRef,
    // Some(None) serializes as an explicit null for contacts without a URN;
    // None drops the field entirely for anonymous orgs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urn: Option<Option<String>>,
    pub channel: Option<ChannelRef>,
    pub flow: Option<FlowRef>,
    pub direction: Option<&'static str>,
    #[serde(rename = "type")]
    pub msg_type: Option<&'static str>,
    pub status: Option<&'static str>,
    pub visibility: Option<&'static str>,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub labels: serde_json::Value,
    pub created_on: DateTime<Utc>,
    pub sent_on: Option<DateTime<Utc>>,
    pub modified_on: DateTime<Utc>,
}

impl MessageRecord {
    pub fn from_row(row: MessageExportRow, org_is_anon: bool) -> MessageRecord {
        MessageRecord {
            id: row.id,
            broadcast: row.broadcast_id,
            contact: ContactRef {
                uuid: row.contact_uuid,
                name: row.contact_name,
            },
            urn: if org_is_anon {
                None
            } else {
                Some(row.urn_identity)
            },
            channel: row.channel_uuid.map(|uuid| ChannelRef {
                uuid,
                name: row.channel_name,
            }),
            flow: row.flow_uuid.map(|uuid| FlowRef {
                uuid,
                name: row.flow_name,
            }),
            direction: decode_direction(&row.direction),
            msg_type: decode_msg_type(&row.msg_type),
            status: decode_status(&row.status),
            visibility: decode_visibility(&row.visibility),
            text: row.text,
            attachments: parse_attachments(row.attachments.as_deref().unwrap_or(&[])),
            labels: row.labels,
            created_on: row.created_on,
            sent_on: row.sent_on,
            modified_on: row.modified_on,
        }
    }
}

/// Parse `content_type:url` encoded attachments. The split is on the first
/// colon, so URL schemes stay intact; a value without a colon becomes a bare
/// URL with an empty content type.
pub fn parse_attachments(raw: &[String]) -> Vec<Attachment> {
    raw.iter()
        .map(|a| match a.split_once(':') {
            Some((content_type, url)) => Attachment {
                content_type: content_type.to_string(),
                url: url.to_string(),
            },
            None => Attachment {
                content_type: String::new(),
                url: a.clone(),
            },
        })
        .collect()
}
