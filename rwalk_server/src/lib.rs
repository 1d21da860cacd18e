//! rwalk server - runs the walk simulation and streams it to observers
//!
//! The pieces, in the order data flows through them:
//! - [`WalkEngine`]: replication loop on a dedicated thread
//! - [`Hub`]: shared state, trial history and catch-up for late joiners
//! - [`ClientRegistry`]: per-client bounded queues and fan-out
//! - [`Server`]: Unix-socket accept loop, command readers and shutdown

pub mod engine;
pub mod error;
pub mod hub;
pub mod pacing;
pub mod registry;
pub mod server;
pub mod state;

pub use engine::{RunSummary, WalkEngine};
pub use error::ServerError;
pub use hub::{Admission, Hub, DEFAULT_CLIENT_QUEUE};
pub use pacing::{NoPacing, Pacer, ThreadSleep};
pub use registry::{ClientId, ClientRegistry};
pub use server::Server;
pub use state::{Phase, SimState};
