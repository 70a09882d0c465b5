use chrono::{DateTime, Utc};

/// Per-org slice of a pass, accumulated as the orchestrator walks the org
/// list
#[derive(Debug, Clone)]
pub struct OrgPassMetrics {
    pub org_id: i32,
    pub org_name: String,
    pub created: usize,
    pub failed: usize,
    pub rollups_created: usize,
    pub rollups_failed: usize,
    pub records_archived: i64,
    pub deleted: usize,
    pub delete_failed: usize,
    pub duration_secs: f64,
}

impl OrgPassMetrics {
    fn had_activity(&self) -> bool {
        self.created
            + self.failed
            + self.rollups_created
            + self.rollups_failed
            + self.deleted
            + self.delete_failed
            > 0
    }
}

/// The whole pass, rendered into the log when it finishes. Orgs with nothing
/// to do are tallied but not listed line by line.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub started_at: Option<DateTime<Utc>>,
    pub total_duration_secs: f64,
    pub orgs: Vec<OrgPassMetrics>,
}

impl PassReport {
    pub fn new(started_at: DateTime<Utc>) -> PassReport {
        PassReport {
            started_at: Some(started_at),
            total_duration_secs: 0.0,
            orgs: Vec::new(),
        }
    }

    pub fn add_org(&mut self, metrics: OrgPassMetrics) {
        self.orgs.push(metrics);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        let idle = self.orgs.iter().filter(|o| !o.had_activity()).count();
        out.push_str(&format!(
            "pass over {} orgs ({} idle) in {}\n",
            self.orgs.len(),
            idle,
            format_duration(self.total_duration_secs)
        ));

        for org in self.orgs.iter().filter(|o| o.had_activity()) {
            out.push_str(&format!(
                "  org {} ({}): {} built / {} failed, {} rollups / {} failed, {} records, {} purged / {} failed, {}\n",
                org.org_id,
                org.org_name,
                org.created,
                org.failed,
                org.rollups_created,
                org.rollups_failed,
                format_number(org.records_archived.max(0) as u64),
                org.deleted,
                org.delete_failed,
                format_duration(org.duration_secs)
            ));
        }

        out
    }
}

pub fn format_duration(secs: f64) -> String {
    let total = secs.round().max(0.0) as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    match (hours, minutes) {
        (0, 0) => format!("{}s", seconds),
        (0, _) => format!("{}m{:02}s", minutes, seconds),
        _ => format!("{}h{:02}m", hours, minutes),
    }
}

pub fn format_number(n: u64) -> String {
    let digits = n.to_string().into_bytes();
    let mut groups: Vec<&[u8]> = digits.rchunks(3).collect();
    groups.reverse();
    let grouped: Vec<&str> = groups
        .into_iter()
        .map(|g| std::str::from_utf8(g).unwrap_or_default())
        .collect();
    grouped.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org_metrics(org_id: i32, created: usize) -> OrgPassMetrics {
        OrgPassMetrics {
            org_id,
            org_name: format!("Org {}", org_id),
            created,
            failed: 0,
            rollups_created: 0,
            rollups_failed: 0,
            records_archived: created as i64 * 1000,
            deleted: 0,
            delete_failed: 0,
            duration_secs: 12.5,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.2), "0s");
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(90.0), "1m30s");
        assert_eq!(format_duration(3600.0), "1h00m");
        assert_eq!(format_duration(5430.0), "1h30m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_render_skips_idle_orgs() {
        let mut report = PassReport::new(Utc::now());
        report.total_duration_secs = 100.0;
        report.add_org(org_metrics(1, 3));
        report.add_org(org_metrics(2, 0));

        let rendered = report.render();
        assert!(rendered.contains("pass over 2 orgs (1 idle)"));
        assert!(rendered.contains("org 1 (Org 1): 3 built"));
        assert!(rendered.contains("3,000 records"));
        assert!(!rendered.contains("org 2"));
    }
}
