//! cellgrid-state — embedded state store for cellgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for cells, tenants, the tenant → cell mapping table, deployment
//! runs, and the approval queue.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Deployment runs are stored opaquely (any `Serialize` type) so the
//! orchestrator owns their shape. Approval keys are composite
//! (`{run_id}:{wave_number}`).
//!
//! Read-modify-write updates of a cell (status, tenant count) happen
//! inside a single write transaction, so concurrent capacity checks and
//! deployment status writes never interleave on the same record.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
