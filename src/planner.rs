use std::collections::HashSet;

use chrono::{DateTime, Months, NaiveDate, TimeDelta, Utc};

use crate::archives::{month_start, Archive, ArchiveType, Period};
use crate::orgs::Org;

/// Compute the day archives that should exist but don't.
///
/// Candidates run from the org's creation date through
/// `now − retention_days − 1`, both UTC dates. A date is excluded when an
/// existing day archive starts on it or an existing month archive's window
/// contains it. Ascending by date.
pub fn missing_day_archives(
    org: &Org,
    now: DateTime<Utc>,
    archive_type: ArchiveType,
    existing: &[Archive],
    retention_days: i64,
) -> Vec<Archive> {
    let first = org.created_on.date_naive();
    let last = now.date_naive() - TimeDelta::days(retention_days + 1);

    let day_starts: HashSet<NaiveDate> = existing
        .iter()
        .filter(|a| a.period == Period::Day)
        .map(|a| a.start_date)
        .collect();
    let months: Vec<&Archive> = existing
        .iter()
        .filter(|a| a.period == Period::Month)
        .collect();

    let mut missing = Vec::new();
    let mut current = first;
    while current <= last {
        if !day_starts.contains(&current) && !months.iter().any(|m| m.covers(current)) {
            missing.push(Archive::new(org.id, archive_type, Period::Day, current));
        }
        current = current + TimeDelta::days(1);
    }
    missing
}

/// Compute the month archives that should exist but don't.
///
/// Candidates run from the first of the org's creation month through the
/// month before the one containing `now − retention_days`. Only an existing
/// month archive excludes a candidate; overlap with the day list is
/// deliberate — on a first pass months are built straight from the database,
/// on later passes the day tail is built and months roll up from dailies.
pub fn missing_month_archives(
    org: &Org,
    now: DateTime<Utc>,
    archive_type: ArchiveType,
    existing: &[Archive],
    retention_days: i64,
) -> Vec<Archive> {
    let first = month_start(org.created_on.date_naive());
    let horizon = month_start(now.date_naive() - TimeDelta::days(retention_days));
    let Some(last) = horizon.checked_sub_months(Months::new(1)) else {
        return Vec::new();
    };

    let month_starts: HashSet<NaiveDate> = existing
        .iter()
        .filter(|a| a.period == Period::Month)
        .map(|a| a.start_date)
        .collect();

    let mut missing = Vec::new();
    let mut current = first;
    while current <= last {
        if !month_starts.contains(&current) {
            missing.push(Archive::new(org.id, archive_type, Period::Month, current));
        }
        current = current + Months::new(1);
    }
    missing
}

/// The day archives a month rollup would subsume, restricted to dates on or
/// after the org's creation date (an org created mid-month has a short first
/// month). Returns the dates with no matching day archive; a rollup can only
/// proceed when this is empty.
pub fn missing_rollup_dailies(
    org: &Org,
    month: &Archive,
    dailies: &[Archive],
) -> Vec<NaiveDate> {
    let day_starts: HashSet<NaiveDate> = dailies
        .iter()
        .filter(|a| a.period == Period::Day)
        .map(|a| a.start_date)
        .collect();

    let mut missing = Vec::new();
    let mut current = month.start_date.max(org.created_on.date_naive());
    while current < month.end_date() {
        if !day_starts.contains(&current) {
            missing.push(current);
        }
        current = current + TimeDelta::days(1);
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn org(created: DateTime<Utc>) -> Org {
        Org {
            id: 3,
            name: "Nyala".to_string(),
            created_on: created,
            is_anon: false,
            is_active: true,
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 8, 12, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_nothing_to_archive_inside_retention() {
        // created 2017-11-10, retention 90: everything still hot
        let o = org(Utc.with_ymd_and_hms(2017, 11, 10, 8, 15, 0).unwrap());

        let days = missing_day_archives(&o, fixed_now(), ArchiveType::Message, &[], 90);
        assert!(days.is_empty());

        let months = missing_month_archives(&o, fixed_now(), ArchiveType::Message, &[], 90);
        assert!(months.is_empty());
    }

    #[test]
    fn test_full_backlog_for_old_org() {
        // created 2017-08-10: 61 days (2017-08-10 ..= 2017-10-09) and two months
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());

        let days = missing_day_archives(&o, fixed_now(), ArchiveType::Message, &[], 90);
        assert_eq!(days.len(), 61);
        assert_eq!(days[0].start_date, date(2017, 8, 10));
        assert_eq!(days[60].start_date, date(2017, 10, 9));
        assert!(days.iter().all(|a| a.period == Period::Day));

        let months = missing_month_archives(&o, fixed_now(), ArchiveType::Message, &[], 90);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].start_date, date(2017, 8, 1));
        assert_eq!(months[1].start_date, date(2017, 9, 1));
    }

    #[test]
    fn test_existing_day_archives_excluded() {
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());
        let existing = vec![
            Archive::new(3, ArchiveType::Message, Period::Day, date(2017, 8, 10)),
            Archive::new(3, ArchiveType::Message, Period::Day, date(2017, 8, 12)),
        ];

        let days = missing_day_archives(&o, fixed_now(), ArchiveType::Message, &existing, 90);
        assert_eq!(days.len(), 59);
        assert_eq!(days[0].start_date, date(2017, 8, 11));
        assert_eq!(days[1].start_date, date(2017, 8, 13));
    }

    #[test]
    fn test_month_archive_covers_its_days() {
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());
        let existing = vec![Archive::new(
            3,
            ArchiveType::Message,
            Period::Month,
            date(2017, 8, 1),
        )];

        let days = missing_day_archives(&o, fixed_now(), ArchiveType::Message, &existing, 90);
        // all of August is covered; September (30) + Oct 1-9 remain
        assert_eq!(days.len(), 39);
        assert_eq!(days[0].start_date, date(2017, 9, 1));

        let months = missing_month_archives(&o, fixed_now(), ArchiveType::Message, &existing, 90);
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].start_date, date(2017, 9, 1));
    }

    #[test]
    fn test_huge_retention_produces_nothing() {
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());
        assert!(missing_day_archives(&o, fixed_now(), ArchiveType::Message, &[], 3650).is_empty());
        assert!(
            missing_month_archives(&o, fixed_now(), ArchiveType::Message, &[], 3650).is_empty()
        );
    }

    #[test]
    fn test_mid_month_creation_limits_rollup_days() {
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());
        let month = Archive::new(3, ArchiveType::Message, Period::Month, date(2017, 8, 1));

        // no dailies at all: only dates from the creation date forward are required
        let missing = missing_rollup_dailies(&o, &month, &[]);
        assert_eq!(missing.len(), 22);
        assert_eq!(missing[0], date(2017, 8, 10));
        assert_eq!(missing[21], date(2017, 8, 31));

        // complete dailies: rollup can proceed
        let dailies: Vec<Archive> = (10..=31)
            .map(|d| Archive::new(3, ArchiveType::Message, Period::Day, date(2017, 8, d)))
            .collect();
        assert!(missing_rollup_dailies(&o, &month, &dailies).is_empty());

        // one hole fails fast
        let holey: Vec<Archive> = dailies
            .iter()
            .filter(|a| a.start_date != date(2017, 8, 20))
            .cloned()
            .collect();
        assert_eq!(missing_rollup_dailies(&o, &month, &holey), vec![date(2017, 8, 20)]);
    }

    #[test]
    fn test_day_and_month_lists_disjoint_on_covered_dates() {
        // a recorded month must suppress its days from the day list while the
        // month list no longer offers it either
        let o = org(Utc.with_ymd_and_hms(2017, 8, 10, 18, 0, 0).unwrap());
        let existing = vec![
            Archive::new(3, ArchiveType::Message, Period::Month, date(2017, 8, 1)),
            Archive::new(3, ArchiveType::Message, Period::Month, date(2017, 9, 1)),
        ];

        let days = missing_day_archives(&o, fixed_now(), ArchiveType::Message, &existing, 90);
        let months = missing_month_archives(&o, fixed_now(), ArchiveType::Message, &existing, 90);

        assert!(months.is_empty());
        for d in &days {
            assert!(d.start_date >= date(2017, 10, 1));
        }
    }
}
