//! Application layer: the streaming pipeline and the state it shares.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure types and rules) and the infrastructure (sockets, Bluetooth, files).
//!
//! Code in this layer:
//!
//! - **Orchestrates** domain values to do the bridge's job: move the newest
//!   color from the upstream controller to every strip.
//! - **Depends on abstractions** (the [`registry::LedTransport`] and
//!   [`registry::DeviceLink`] traits) rather than a Bluetooth stack, so the
//!   whole pipeline runs in tests against an in-memory transport.
//! - **Contains no OS calls**: no sockets, no files, no adapters.
//!
//! # Sub-modules
//!
//! - **`frame_queue`**  – Single-slot, freshest-wins hand-off from the
//!   receiver to the broadcaster.
//! - **`broadcaster`**  – The cadence-bounded fan-out loop.  This is the hot
//!   path and the most critical piece of the bridge.
//! - **`registry`**     – Known strips, their connections, and reconnects.
//! - **`stream_state`** – Counters and flags read by the control surface.
//! - **`context`**      – The per-run [`context::BridgeContext`] and the
//!   [`context::ShutdownSignal`].
//! - **`status`**       – The serialisable status snapshot.

pub mod broadcaster;
pub mod context;
pub mod frame_queue;
pub mod registry;
pub mod status;
pub mod stream_state;
