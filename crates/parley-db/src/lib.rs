//! Call-record storage for Parley.
//!
//! SQLite behind an `r2d2` pool in WAL mode, with schema changes shipped as
//! SQL files embedded via `include_str!` and applied once at startup. The
//! [`calls`] module holds the queries the orchestration layer needs at the
//! end of every turn and every call: transcript rows and the closing summary.

pub mod calls;
mod migrations;
mod pool;

pub use calls::{
    create_call, get_call, list_transcript, save_summary, save_turn, CallDirection, CallOutcome,
    CallRecord, CallRecordError, NewCall, TranscriptEntry,
};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
