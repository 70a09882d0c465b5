use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

/// Engine configuration. Every flag has an environment fallback so the
/// systemd unit can drive it from an env file.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "coldstore",
    about = "Tiers messages and flow runs to cold storage and reclaims database space"
)]
pub struct Config {
    /// Postgres connection string; must not select a non-UTC time zone
    #[arg(
        long,
        env = "COLDSTORE_DB",
        default_value = "postgres://localhost/coldstore?sslmode=disable"
    )]
    pub db: String,

    /// Directory archives are staged in before upload
    #[arg(long, env = "COLDSTORE_TEMP_DIR", default_value = "/tmp")]
    pub temp_dir: PathBuf,

    /// Days of recent data kept hot in the operational tables
    #[arg(long, env = "COLDSTORE_RETENTION_DAYS", default_value_t = 90)]
    pub retention_days: i64,

    /// Delete source rows once their archive has been verified in the store
    #[arg(long, env = "COLDSTORE_DELETE", default_value_t = false)]
    pub delete: bool,

    /// Archive message records
    #[arg(
        long,
        env = "COLDSTORE_ARCHIVE_MESSAGES",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub archive_messages: bool,

    /// Archive flow run records
    #[arg(
        long,
        env = "COLDSTORE_ARCHIVE_RUNS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub archive_runs: bool,

    /// UTC HH:MM at which the daily pass starts when looping
    #[arg(long, env = "COLDSTORE_START_TIME", default_value = "00:01")]
    pub start_time: String,

    /// Run a single pass and exit instead of looping
    #[arg(long, env = "COLDSTORE_ONCE", default_value_t = false)]
    pub once: bool,

    #[arg(long, env = "COLDSTORE_S3_BUCKET", default_value = "coldstore-archives")]
    pub s3_bucket: String,

    #[arg(
        long,
        env = "COLDSTORE_S3_ENDPOINT",
        default_value = "https://s3.amazonaws.com"
    )]
    pub s3_endpoint: String,

    #[arg(long, env = "COLDSTORE_S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", default_value = "")]
    pub aws_access_key_id: String,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", default_value = "")]
    pub aws_secret_access_key: String,

    /// Non-AWS store: path-style addressing against s3_endpoint
    #[arg(long, env = "COLDSTORE_S3_MINIO", default_value_t = false)]
    pub s3_minio: bool,

    /// Require MD5 parity on pre-deletion integrity checks where the store
    /// reports a usable digest
    #[arg(
        long,
        env = "COLDSTORE_CHECK_S3_HASHES",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub check_s3_hashes: bool,

    #[arg(long, env = "COLDSTORE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "COLDSTORE_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    /// Prometheus exporter bind address; unset disables the listener
    #[arg(long, env = "COLDSTORE_METRICS_LISTEN")]
    pub metrics_listen: Option<std::net::SocketAddr>,

    #[arg(long, env = "COLDSTORE_DEPLOYMENT_ID", default_value = "dev")]
    pub deployment_id: String,
}

impl Config {
    /// Checks that are cheap enough to run before touching any backend.
    /// Failures here are startup-fatal.
    pub fn validate(&self) -> Result<()> {
        dsn_time_zone_is_utc(&self.db)?;
        self.start_time_parts()?;
        if self.retention_days < 0 {
            bail!("retention_days cannot be negative");
        }
        if self.s3_bucket.is_empty() {
            bail!("s3_bucket cannot be empty");
        }
        Ok(())
    }

    /// Parsed `HH:MM` start time
    pub fn start_time_parts(&self) -> Result<(u32, u32)> {
        let (h, m) = self
            .start_time
            .split_once(':')
            .with_context(|| format!("invalid start_time {:?}, expected HH:MM", self.start_time))?;
        let hour: u32 = h
            .parse()
            .with_context(|| format!("invalid start_time hour {:?}", h))?;
        let minute: u32 = m
            .parse()
            .with_context(|| format!("invalid start_time minute {:?}", m))?;
        if hour > 23 || minute > 59 {
            bail!("start_time {} is out of range", self.start_time);
        }
        Ok((hour, minute))
    }
}

/// Refuse any DSN that pins the session to a non-UTC time zone. All interval
/// arithmetic in the engine assumes UTC dates.
fn dsn_time_zone_is_utc(dsn: &str) -> Result<()> {
    let Some((_, query)) = dsn.split_once('?') else {
        return Ok(());
    };
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if (key.eq_ignore_ascii_case("timezone") || key.eq_ignore_ascii_case("time_zone"))
            && !value.eq_ignore_ascii_case("utc")
        {
            bail!(
                "database connection must use the UTC time zone, dsn requests {:?}",
                value
            );
        }
    }
    Ok(())
}

/// Startup probe: the staging directory must exist and be writable
pub fn probe_temp_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("cannot create temp directory {}", dir.display()))?;
    let probe = dir.join(format!(".coldstore-probe-{}", std::process::id()));
    fs::write(&probe, b"probe")
        .with_context(|| format!("temp directory {} is not writable", dir.display()))?;
    fs::remove_file(&probe).ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(args: &[&str]) -> Config {
        let mut argv = vec!["coldstore"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.retention_days, 90);
        assert!(!config.delete);
        assert!(config.archive_messages);
        assert!(config.archive_runs);
        assert_eq!(config.start_time, "00:01");
        assert!(!config.once);
        assert!(config.check_s3_hashes);
    }

    #[test]
    fn test_start_time_parsing() {
        let config = config_with(&["--start-time", "23:45"]);
        assert_eq!(config.start_time_parts().unwrap(), (23, 45));

        for bad in ["2345", "24:00", "12:60", "ab:cd", ""] {
            let config = config_with(&["--start-time", bad]);
            assert!(config.start_time_parts().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_non_utc_dsn_is_refused() {
        let config = config_with(&[
            "--db",
            "postgres://localhost/coldstore?timezone=US/Pacific",
        ]);
        assert!(config.validate().is_err());

        let config = config_with(&["--db", "postgres://localhost/coldstore?TimeZone=UTC"]);
        assert!(config.validate().is_ok());

        let config = config_with(&["--db", "postgres://localhost/coldstore?sslmode=disable"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_boolean_flags_take_values() {
        let config = config_with(&["--archive-messages", "false", "--delete"]);
        assert!(!config.archive_messages);
        assert!(config.delete);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_fallback() {
        unsafe {
            std::env::set_var("COLDSTORE_RETENTION_DAYS", "30");
            std::env::set_var("COLDSTORE_DELETE", "true");
        }
        let config = config_with(&[]);
        assert_eq!(config.retention_days, 30);
        assert!(config.delete);

        // flags win over the environment
        let config = config_with(&["--retention-days", "45"]);
        assert_eq!(config.retention_days, 45);

        unsafe {
            std::env::remove_var("COLDSTORE_RETENTION_DAYS");
            std::env::remove_var("COLDSTORE_DELETE");
        }
    }

    #[test]
    fn test_probe_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        probe_temp_dir(dir.path()).unwrap();
        // a nested directory is created on demand
        probe_temp_dir(&dir.path().join("staging")).unwrap();
    }
}
