//! The real-time call bridge.
//!
//! Each accepted media-stream socket gets a [`CallBridge`] for shared state and
//! a [`BridgeOrchestrator`] that runs the call. Active bridges are tracked in a
//! [`CallRegistry`].

mod config;
mod egress;
mod error;
mod orchestrator;
mod registry;
mod state;

pub use config::{BridgeConfig, ToneConfig};
pub use egress::TelephonyEgress;
pub use error::{BridgeError, BridgeResult};
pub use orchestrator::BridgeOrchestrator;
pub use registry::{CallRegistry, RegistryGuard};
pub use state::{BridgeReport, BridgeState, BridgeStats, CallBridge, CallerContext};
