// Relaycast Models
// Data structures shared by the services and the HTTP layer

mod platform;
mod destination;
mod preset;
mod channel;
mod flow;
mod settings;

pub use platform::*;
pub use destination::*;
pub use preset::*;
pub use channel::*;
pub use flow::*;
pub use settings::*;
