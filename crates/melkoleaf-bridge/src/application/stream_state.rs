//! Counters and flags shared between the pipeline and observers.
//!
//! The receiver and broadcaster update these on every packet/cycle while the
//! control surface reads them at any time, so every field is an atomic except
//! the last color, which is a small lock-guarded value.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use melkoleaf_core::Rgb;

#[derive(Debug, Default)]
pub struct StreamState {
    paused: AtomicBool,
    streaming_active: AtomicBool,
    packets_received: AtomicU64,
    decode_errors: AtomicU64,
    commands_sent: AtomicU64,
    last_color: Mutex<Option<Rgb>>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Sets the pause flag and returns its previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.paused.swap(paused, Ordering::Relaxed)
    }

    pub fn is_streaming_active(&self) -> bool {
        self.streaming_active.load(Ordering::Relaxed)
    }

    pub fn set_streaming_active(&self, active: bool) {
        self.streaming_active.store(active, Ordering::Relaxed);
    }

    /// Records a decoded packet.  Returns the new packet count.
    pub fn record_packet(&self, color: Rgb) -> u64 {
        self.set_last_color(color);
        self.packets_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a datagram that failed to decode.  Returns the new error count.
    pub fn record_decode_error(&self) -> u64 {
        self.decode_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Records a broadcast cycle that reached at least one device.
    pub fn record_command_sent(&self) -> u64 {
        self.commands_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn commands_sent(&self) -> u64 {
        self.commands_sent.load(Ordering::Relaxed)
    }

    /// Most recent color received from any source.
    pub fn last_color(&self) -> Option<Rgb> {
        *self.last_color.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_last_color(&self, color: Rgb) {
        *self.last_color.lock().unwrap_or_else(PoisonError::into_inner) = Some(color);
    }
}
