// === Public Modules (The Canonical Paths) ===
pub mod collector;
pub mod data;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod scenario;
pub mod store;
pub mod wire;

// === Private Implementation Details ===
mod macros;

// === Facades (Re-exporting internals) ===
pub use crate::collector::browser::{SessionCapture, SessionSource};
pub use crate::collector::control::ControlCommand;
pub use crate::data::config::{BackoffConfig, ConfigSnapshot, MonitorConfig};
pub use crate::data::event::{Event, EventKind, LineItemObservation};
pub use crate::error::{RemateError, RemateResult};
pub use crate::monitor::{Monitor, MonitorBuilder, MonitorHandle};
pub use crate::scenario::Scenario;
pub use crate::store::memory::MemoryStore;
pub use crate::store::Store;
pub use crate::wire::client::{PortalTransport, SessionCookies};
