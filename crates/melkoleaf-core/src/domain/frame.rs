//! A single color update travelling from the stream receiver to the
//! broadcaster.

use std::time::{Duration, Instant};

use crate::domain::color::Rgb;

/// An immutable color sample stamped with its arrival time.
///
/// Frames are produced by the stream receiver (or an HTTP static-color
/// request), pass through the freshest-wins queue, and are consumed at most
/// once by the broadcaster.  A frame that is superseded before it is consumed
/// is simply dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub color: Rgb,
    pub received_at: Instant,
}

impl Frame {
    /// Creates a frame stamped with the current instant.
    pub fn now(color: Rgb) -> Self {
        Self {
            color,
            received_at: Instant::now(),
        }
    }

    /// Time elapsed since the frame arrived.
    pub fn age(&self) -> Duration {
        self.received_at.elapsed()
    }
}
