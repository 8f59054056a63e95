pub mod bridge;
pub mod cli;
pub mod error;
pub mod metadata;
pub mod retry;
pub mod units;
pub mod uplink;

pub use bridge::{run, BridgeConfig};
pub use error::NodeError;
