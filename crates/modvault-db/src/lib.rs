//! SQLite persistence for published mod versions.
//!
//! [`SqliteRecordStore`] implements [`modvault_core::RecordStore`];
//! [`SqliteJobQueue`] implements [`modvault_core::JobQueue`] on the same
//! database so a scan job and its version live side by side.
//!
//! ```no_run
//! use modvault_db::SqliteRecordStore;
//!
//! let records = SqliteRecordStore::open(std::path::Path::new("modvault.db"))?;
//! let jobs = records.job_queue();
//! # let _ = jobs;
//! # Ok::<(), modvault_core::RecordError>(())
//! ```

pub mod job_queue;
pub mod record_store;
pub mod schema;

pub use job_queue::{JobStatus, ScanJob, SqliteJobQueue};
pub use record_store::SqliteRecordStore;
pub use schema::RECORD_SCHEMA;
