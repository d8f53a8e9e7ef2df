//! Watch Together - Core Library
//!
//! This library keeps several players showing the same item at the same
//! playhead by reconciling each of them against one shared room record,
//! and promotes a shared FIFO queue when playback ends.

pub mod clock;
pub mod drift;
pub mod ffi;
pub mod player;
pub mod room_code;
pub mod session;
pub mod store;
pub mod sync;

// Re-exports for convenience
pub use clock::{Clock, SharedClock, SystemClock};
pub use player::{HttpPlayer, MemoryPlayer, PlayerAdapter, PlayerStatus};
pub use room_code::RoomCode;
pub use session::{SessionConfig, SessionHandle, SessionObserver};
pub use store::{MemoryStore, RestStore, SharedStore};
pub use sync::{Intent, QueueEntry, RoomPatch, RoomState};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
