//! coldstore - tiers high-volume operational records to cold storage
//!
//! Messages and flow runs older than the retention window are streamed out
//! of Postgres into content-addressed, gzip-compressed archives in an
//! S3-compatible store, day by day and month by month; once a blob's
//! integrity is verified the source rows are deleted in bounded batches to
//! reclaim database space.

pub mod archiver;
pub mod archives;
pub mod archives_repo;
pub mod config;
pub mod deleter;
pub mod messages;
pub mod messages_repo;
pub mod metrics;
pub mod orgs;
pub mod orgs_repo;
pub mod planner;
pub mod report;
pub mod rollup;
pub mod runs;
pub mod runs_repo;
pub mod runtime;
pub mod s3;
pub mod schema;
pub mod writer;

pub use archives::{Archive, ArchiveType, Period};
pub use archiver::{run_pass, PassSummary};
pub use config::Config;
pub use runtime::Runtime;
