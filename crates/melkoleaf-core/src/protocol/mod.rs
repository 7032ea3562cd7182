//! Protocol codecs for both sides of the bridge.
//!
//! - [`stream`] decodes Nanoleaf extControl datagrams from the upstream
//!   controller into a representative color.
//! - [`command`] encodes the 9-byte MELK commands written to the strips.
//! - [`anim_data`] parses the textual `animData` of a static effect, which the
//!   controller may send over HTTP instead of streaming.

pub mod anim_data;
pub mod command;
pub mod stream;

pub use anim_data::parse_static_anim_data;
pub use command::{encode_color, WireCommand, WIRE_COMMAND_LEN};
pub use stream::{decode_stream_packet, PanelColor, StreamError, StreamPacket, StreamVersion};
