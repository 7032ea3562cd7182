//! # melkoleaf-core
//!
//! Shared library for the MelkoLeaf bridge containing the color model, the
//! MELK Bluetooth wire command encoder, and the Nanoleaf streaming datagram
//! decoder.
//!
//! This crate has zero dependencies on OS APIs, Bluetooth stacks, or network
//! sockets.  Everything here is a pure function or a plain value type, so it
//! can be unit tested and benchmarked in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! The bridge sits between two peers it does not control:
//!
//! ```text
//! RGB controller ──(Nanoleaf UDP/HTTP)──► bridge ──(MELK BLE, 9 bytes)──► LED strips
//! ```
//!
//! - **`domain`** – Value types shared by every layer: [`Rgb`] colors,
//!   timestamped [`Frame`]s, normalised Bluetooth [`DeviceAddress`]es and the
//!   static [`PanelLayoutDescriptor`] the bridge reports upstream.
//!
//! - **`protocol`** – How bytes travel on each side.  Upstream datagrams are
//!   decoded by [`decode_stream_packet`]; downstream commands are produced by
//!   [`WireCommand::encode`].

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `melkoleaf_core::Rgb` instead of `melkoleaf_core::domain::color::Rgb`.
pub use domain::color::Rgb;
pub use domain::device::{DeviceAddress, DeviceAddressError};
pub use domain::frame::Frame;
pub use domain::layout::{PanelLayoutDescriptor, PanelPosition};
pub use protocol::anim_data::parse_static_anim_data;
pub use protocol::command::{encode_color, WireCommand, WIRE_COMMAND_LEN};
pub use protocol::stream::{decode_stream_packet, PanelColor, StreamError, StreamPacket, StreamVersion};
