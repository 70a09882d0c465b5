//! Flow runs through the writer chain: shaping, the active-run gate, and
//! blob self-consistency, all without a database.

use std::fs::{self, File};
use std::io::{Read, Write};

use chrono::{NaiveDate, TimeZone, Utc};
use flate2::read::MultiGzDecoder;
use md5::{Digest, Md5};
use uuid::Uuid;

use coldstore::archives::{Archive, ArchiveType, Period};
use coldstore::runs::{RunExportRow, RunRecord};
use coldstore::writer::build_archive;

fn run_row(id: i64, status: &str) -> RunExportRow {
    RunExportRow {
        id,
        uuid: Uuid::parse_str("4ced1260-9cfe-4b7f-81dd-b637108f15b9").unwrap(),
        flow_uuid: Some(Uuid::parse_str("6d3cf1eb-546e-4fb8-a5ca-69187648fbf6").unwrap()),
        flow_name: Some("Favorites".to_string()),
        contact_uuid: Uuid::parse_str("3e814add-e614-41f7-8b5d-a07f670a698f").unwrap(),
        contact_name: Some("Bob".to_string()),
        responded: true,
        path: Some(
            r#"[{"node_uuid":"10896d63-8df7-4022-88dd-a9d93edf355b","arrived_on":"2017-08-12T13:07:24Z"}]"#
                .to_string(),
        ),
        results: Some(
            r#"{"color":{"name":"Color","value":"blue","input":"blue","category":"Blue","node_uuid":"10896d63-8df7-4022-88dd-a9d93edf355b","created_on":"2017-08-12T13:07:24Z"}}"#
                .to_string(),
        ),
        created_on: Utc.with_ymd_and_hms(2017, 8, 12, 13, 7, 24).unwrap(),
        modified_on: Utc.with_ymd_and_hms(2017, 8, 12, 13, 8, 30).unwrap(),
        exited_on: Some(Utc.with_ymd_and_hms(2017, 8, 12, 13, 8, 30).unwrap()),
        exit_type: Some("C".to_string()),
        status: status.to_string(),
    }
}

#[test]
fn test_run_archive_is_self_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = Archive::new(
        3,
        ArchiveType::FlowRun,
        Period::Day,
        NaiveDate::from_ymd_opt(2017, 8, 12).unwrap(),
    );

    build_archive(&mut archive, dir.path(), |out| {
        let mut count = 0i64;
        for id in [1, 2] {
            let record = RunRecord::from_row(run_row(id, "C"))?;
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
            count += 1;
        }
        Ok(count)
    })
    .unwrap();

    assert_eq!(archive.record_count, 2);
    assert!(archive.archive_file.contains("run_3_D20170812_"));

    let bytes = fs::read(&archive.archive_file).unwrap();
    assert_eq!(bytes.len() as i64, archive.size);
    assert_eq!(hex::encode(Md5::digest(&bytes)), archive.hash);

    let mut payload = Vec::new();
    MultiGzDecoder::new(File::open(&archive.archive_file).unwrap())
        .read_to_end(&mut payload)
        .unwrap();
    let text = String::from_utf8(payload).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["exit_type"], "completed");
    assert_eq!(first["values"]["color"]["value"], "blue");
    assert_eq!(
        first["path"][0]["node"],
        "10896d63-8df7-4022-88dd-a9d93edf355b"
    );
}

#[test]
fn test_active_run_aborts_the_whole_build_and_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = Archive::new(
        3,
        ArchiveType::FlowRun,
        Period::Day,
        NaiveDate::from_ymd_opt(2017, 8, 12).unwrap(),
    );

    let result = build_archive(&mut archive, dir.path(), |out| {
        let mut count = 0i64;
        for (id, status) in [(1, "C"), (2, "W")] {
            let record = RunRecord::from_row(run_row(id, status))?;
            serde_json::to_writer(&mut *out, &record)?;
            out.write_all(b"\n")?;
            count += 1;
        }
        Ok(count)
    });

    assert!(result.is_err());
    assert!(archive.archive_file.is_empty());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}
