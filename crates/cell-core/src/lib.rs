pub mod config;
pub mod endpoint;
pub mod ids;
pub mod types;

pub use config::CellgridConfig;
pub use endpoint::{CellEndpoint, EndpointError};
pub use types::*;

/// Current wall-clock time as Unix seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
