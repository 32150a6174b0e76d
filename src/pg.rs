//! PostgreSQL on-disk formats and live-server collaborators.
//!
//! - [`control`]: the `global/pg_control` cluster state file
//! - [`version`]: `PG_VERSION` detection and the supported-version gate
//! - [`schema`]: the live-database capability trait used for population
//! - [`wal`]: write-ahead log segment, page, and record parsing

pub mod control;
pub mod schema;
pub mod version;
pub mod wal;
