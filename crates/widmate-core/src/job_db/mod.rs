//! Best-effort persistence of job records (SQLite via sqlx).
//!
//! The store journals every committed mutation; a background worker drains the
//! journal into the `jobs` table. On startup the table is loaded back and fed
//! to `JobStore::restore`.

pub mod db;
mod jobs;
pub mod worker;


pub use db::JobDb;
pub use worker::spawn_persistence_worker;
