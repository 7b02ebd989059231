//! In-memory view of recent readings.
//!
//! This module contains the sliding window buffer that display consumers read
//! from. It is fed by the source arbiter and seeded from the retention store.

pub mod windowing;

// Re-export commonly used types
pub use windowing::{
    create_shared_buffer, read_buffer, write_buffer, SharedWindowBuffer, WindowBuffer,
    DEFAULT_WINDOW_MINUTES,
};
