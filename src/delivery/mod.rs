//! Delivery resolution subsystem.
//!
//! Turns a device position or a user-entered pincode into a delivery zone,
//! arbitrates between the two paths, and persists the outcome so every
//! surface reads the same answer.

pub mod cache;
pub mod orchestrator;
pub mod providers;
pub mod race;
pub mod resolver;
pub mod table;
pub mod types;

pub use cache::{FileStore, KeyValueStore, MemoryStore, ResolutionCache};
pub use orchestrator::{DeliveryEngine, Orchestrator, Timings};
pub use providers::{GeolocationError, GeolocationProvider, IpGeolocationProvider, PositionOptions};
pub use resolver::{is_valid_postal_code, PostalCodeResolver};
pub use table::{BuiltinTable, PostalCodeRecord, PostalCodeTable, RecordTable, DEPOT};
pub use types::{
    FallbackReason, OrchestratorState, ResolutionResult, ResolutionSource, ResolveError, Snapshot,
};
