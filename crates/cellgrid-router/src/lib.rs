//! cellgrid tenant router — sends each request to the cell serving its tenant.
//!
//! # Components
//!
//! - **`token`** — tenant claim extraction from the bearer token payload
//! - **`mapping`** — tenant → cell URL stores (state-backed, static, cached snapshot)
//! - **`router`** — `TenantRouter::route`, the per-request decision and rewrite
//! - **`middleware`** — axum adapter for the router
//! - **`sync`** — activation/deactivation, the write side of the mapping table
//!
//! # Trust boundary
//!
//! The router does not verify token signatures. It must sit behind an
//! authorizer that has already validated the token; it only reads the
//! tenant claim to pick a cell.

pub mod mapping;
pub mod middleware;
pub mod router;
pub mod sync;
pub mod token;

pub use mapping::{
    CachedMappingStore, FileMappingSource, MappingError, MappingSource, MappingStore,
    StateMappingStore, StaticMappingStore,
};
pub use router::{Rejection, RejectionKind, RouteOutcome, RoutedOrigin, TenantRouter};
pub use sync::{Activation, ActivationError, RouteSync};
pub use token::TokenError;
