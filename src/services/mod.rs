// Relaycast Services
// Business logic: persistence, control-plane clients and the orchestrator

mod errors;
mod retry;
mod poll;
mod channel_control;
mod flow_control;
mod registry;
mod encryption;
mod secret_store;
mod catalog;
mod simulator;
mod orchestrator;
mod provisioning;
mod health_reporter;
mod destinations;
mod config_loader;
mod backend;
#[cfg(any(test, feature = "test-utils"))]
mod testing;

#[cfg(feature = "aws")]
pub mod aws;

pub use errors::*;
pub use retry::*;
pub use poll::*;
pub use channel_control::*;
pub use flow_control::*;
pub use registry::*;
pub use encryption::*;
pub use secret_store::*;
pub use catalog::*;
pub use simulator::*;
pub use orchestrator::*;
pub use provisioning::*;
pub use health_reporter::*;
pub use destinations::*;
pub use config_loader::*;
pub use backend::*;
#[cfg(any(test, feature = "test-utils"))]
pub use testing::*;
