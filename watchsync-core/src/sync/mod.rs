//! Sync Engine
//!
//! The protocol core: room records, intents, the reconciliation engine,
//! the intent publisher and the queue consumption controller.

mod protocol;
mod publisher;
mod queue;
mod reconcile;
mod state;

pub use protocol::*;
pub use publisher::*;
pub use queue::*;
pub use reconcile::*;
pub use state::*;
