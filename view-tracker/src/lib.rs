//! Deduplicated view counting.
//!
//! Counts "views" of persisted objects (posts, articles, anything with a
//! `view_count` column) while suppressing repeats: a visitor viewing the same
//! object again within a configurable cooldown window does not bump the
//! counter a second time. History is kept in memory per visitor, aged out by
//! background sweeps, and lost on restart - this is deliberately a
//! best-effort, single-process mechanism, not a distributed one.

pub mod client_ip;
pub mod counter;
pub mod event;
pub mod history;
pub mod tracker;

pub use counter::{CounterError, CounterStore, PgCounterStore, SqliteCounterStore};
pub use event::{ViewEvent, Visitor, VisitorKey};
pub use tracker::{TrackError, ViewOutcome, ViewTracker};
