//! The exporter-to-blob pipeline, exercised without a database or object
//! store: records are shaped and streamed through the real writer chain,
//! then the sealed file is checked against the archive laws.

use std::fs::{self, File};
use std::io::{Read, Write};

use chrono::{NaiveDate, TimeZone, Utc};
use flate2::read::MultiGzDecoder;
use md5::{Digest, Md5};
use uuid::Uuid;

use coldstore::archives::{Archive, ArchiveType, Period};
use coldstore::messages::{MessageExportRow, MessageRecord};
use coldstore::writer::build_archive;

fn message_row(id: i64, attachments: Option<Vec<String>>) -> MessageExportRow {
    MessageExportRow {
        id,
        broadcast_id: None,
        contact_uuid: Uuid::parse_str("8f9fed75-d24e-4a29-9e51-0f5d868c89ea").unwrap(),
        contact_name: Some("Ann".to_string()),
        urn_identity: Some("tel:+12067799192".to_string()),
        channel_uuid: Some(Uuid::parse_str("60f2ed5b-05f2-4156-9cf8-ad08a0b8e1b9").unwrap()),
        channel_name: Some("Test Channel".to_string()),
        flow_uuid: None,
        flow_name: None,
        direction: "I".to_string(),
        msg_type: "T".to_string(),
        status: "H".to_string(),
        visibility: "V".to_string(),
        text: format!("message {}", id),
        attachments,
        labels: serde_json::json!([]),
        created_on: Utc.with_ymd_and_hms(2017, 8, 12, 19, 11, id as u32).unwrap(),
        sent_on: None,
        modified_on: Utc.with_ymd_and_hms(2017, 8, 12, 21, 11, 59).unwrap(),
    }
}

fn day_archive() -> Archive {
    Archive::new(
        3,
        ArchiveType::Message,
        Period::Day,
        NaiveDate::from_ymd_opt(2017, 8, 12).unwrap(),
    )
}

fn export_messages(rows: Vec<MessageExportRow>) -> Archive {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = day_archive();
    build_archive(&mut archive, dir.path(), |out| {
        let mut count = 0i64;
        for row in rows {
            let record = MessageRecord::from_row(row, false);
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
            count += 1;
        }
        Ok(count)
    })
    .unwrap();

    // hold the dir open long enough to read the file back
    let bytes = fs::read(&archive.archive_file).unwrap();
    let staged = std::env::temp_dir().join(format!("round-trip-{}.jsonl.gz", Uuid::new_v4().simple()));
    fs::write(&staged, bytes).unwrap();
    archive.archive_file = staged.to_string_lossy().to_string();
    archive
}

fn decompress(path: &str) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(File::open(path).unwrap())
        .read_to_end(&mut out)
        .unwrap();
    out
}

#[test]
fn test_blob_matches_recorded_hash_and_size() {
    let archive = export_messages(vec![
        message_row(1, None),
        message_row(2, None),
        message_row(3, None),
    ]);

    assert_eq!(archive.record_count, 3);
    let bytes = fs::read(&archive.archive_file).unwrap();
    assert_eq!(bytes.len() as i64, archive.size);
    assert_eq!(hex::encode(Md5::digest(&bytes)), archive.hash);

    fs::remove_file(&archive.archive_file).unwrap();
}

#[test]
fn test_lines_reserialize_to_identical_bytes() {
    let archive = export_messages(vec![
        message_row(
            1,
            Some(vec![
                "image/jpeg:https://example.com/a.jpg".to_string(),
                "audio/mp3:https://example.com/b.mp3".to_string(),
            ]),
        ),
        message_row(2, None),
    ]);

    let payload = decompress(&archive.archive_file);
    let text = String::from_utf8(payload).unwrap();
    assert!(text.ends_with('\n'));

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), line);
    }

    // attachments survived as structured objects
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["attachments"][0]["content_type"], "image/jpeg");
    assert_eq!(first["attachments"][1]["url"], "https://example.com/b.mp3");

    fs::remove_file(&archive.archive_file).unwrap();
}

#[test]
fn test_identical_exports_build_identical_archives() {
    let first = export_messages(vec![message_row(1, None), message_row(2, None)]);
    let second = export_messages(vec![message_row(1, None), message_row(2, None)]);

    assert_eq!(first.hash, second.hash);
    assert_eq!(first.size, second.size);
    assert_eq!(
        fs::read(&first.archive_file).unwrap(),
        fs::read(&second.archive_file).unwrap()
    );

    fs::remove_file(&first.archive_file).unwrap();
    fs::remove_file(&second.archive_file).unwrap();
}
