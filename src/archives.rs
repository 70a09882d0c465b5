use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};

/// Record types that can be tiered to cold storage.
///
/// `Session` is recognized by the metadata layer but has no exporter wired
/// up, so the engine never plans or builds session archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    Message,
    FlowRun,
    Session,
}

impl ArchiveType {
    /// Code stored in the archives table and used in object keys
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveType::Message => "message",
            ArchiveType::FlowRun => "run",
            ArchiveType::Session => "session",
        }
    }

    pub fn from_code(code: &str) -> Option<ArchiveType> {
        match code {
            "message" => Some(ArchiveType::Message),
            "run" => Some(ArchiveType::FlowRun),
            "session" => Some(ArchiveType::Session),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Length of the interval an archive covers. Intervals are half-open
/// `[start, end)` in UTC; `start` is always UTC midnight and, for `Month`,
/// the first of the month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Day,
    Month,
}

impl Period {
    /// Single-letter code stored in the archives table
    pub fn code(&self) -> &'static str {
        match self {
            Period::Day => "D",
            Period::Month => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Period> {
        match code {
            "D" => Some(Period::Day),
            "M" => Some(Period::Month),
            _ => None,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// One archive: the metadata row plus transient build state.
///
/// `id` is `None` until the metadata store has inserted the row.
/// `archive_file` points at the sealed local temp file between build and
/// upload and is empty otherwise. `rollup_children` is only populated on a
/// freshly built month rollup; the day→month pointer is persisted on the
/// children, never the other way around.
#[derive(Debug, Clone)]
pub struct Archive {
    pub id: Option<i32>,
    pub org_id: i32,
    pub archive_type: ArchiveType,
    pub period: Period,
    pub start_date: NaiveDate,
    pub created_on: DateTime<Utc>,

    pub record_count: i64,
    pub size: i64,
    pub hash: String,
    pub url: String,
    pub build_time: i64,

    pub needs_deletion: bool,
    pub deleted_on: Option<DateTime<Utc>>,
    pub rollup_id: Option<i32>,

    pub archive_file: String,
    pub rollup_children: Vec<i32>,
}

impl Archive {
    pub fn new(
        org_id: i32,
        archive_type: ArchiveType,
        period: Period,
        start_date: NaiveDate,
    ) -> Archive {
        Archive {
            id: None,
            org_id,
            archive_type,
            period,
            start_date,
            created_on: Utc::now(),
            record_count: 0,
            size: 0,
            hash: String::new(),
            url: String::new(),
            build_time: 0,
            needs_deletion: false,
            deleted_on: None,
            rollup_id: None,
            archive_file: String::new(),
            rollup_children: Vec::new(),
        }
    }

    /// Exclusive end of the covered interval
    pub fn end_date(&self) -> NaiveDate {
        match self.period {
            Period::Day => self.start_date + TimeDelta::days(1),
            Period::Month => self.start_date + Months::new(1),
        }
    }

    pub fn start_instant(&self) -> DateTime<Utc> {
        self.start_date.and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    pub fn end_instant(&self) -> DateTime<Utc> {
        self.end_date().and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    /// Whether the given UTC date falls inside this archive's interval
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date < self.end_date()
    }

    /// Object key under the bucket, e.g. `42/message_D20170812_<hash>.jsonl.gz`
    /// or `42/run_M201708_<hash>.jsonl.gz`. The hash must be set first.
    pub fn object_key(&self) -> String {
        let date_part = match self.period {
            Period::Day => self.start_date.format("%Y%m%d").to_string(),
            Period::Month => self.start_date.format("%Y%m").to_string(),
        };
        format!(
            "{}/{}_{}{}_{}.jsonl.gz",
            self.org_id, self.archive_type, self.period, date_part, self.hash
        )
    }

    /// Canonical blob URL written to the metadata row. Minio and path-style
    /// addressed stores resolve the same key, so lookups always derive the
    /// key from the row rather than parsing this back.
    pub fn canonical_url(&self, bucket: &str) -> String {
        format!("https://{}.s3.amazonaws.com/{}", bucket, self.object_key())
    }

    /// Prefix for the local temp file the writer stages into
    pub fn temp_file_prefix(&self) -> String {
        format!(
            "{}_{}_{}{}_",
            self.archive_type,
            self.org_id,
            self.period,
            self.start_date.format("%Y%m%d")
        )
    }
}

/// First day of the month `date` falls in
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}
