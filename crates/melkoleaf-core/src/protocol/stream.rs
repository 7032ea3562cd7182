//! Decoder for Nanoleaf extControl streaming datagrams.
//!
//! Wire formats (all multi-byte integers are big-endian):
//! ```text
//! v1: [nPanels:1] { [panelId:1][nFrames:1][R][G][B][W][transition:1] } * nPanels   (7 bytes/entry)
//! v2: [nPanels:2] { [panelId:2][R][G][B][W][transition:2] }            * nPanels   (8 bytes/entry)
//! ```
//!
//! The datagram itself does not say which version it is.  A leading zero
//! byte can only be the high byte of a v2 panel count (a v1 count of zero is
//! meaningless), so it selects v2; anything else is v1.  A v2 datagram with a
//! non-zero high byte would need 256+ panels, which no controller sends, and
//! would be longer than any v1 reading of the same bytes anyway.  Either way
//! the datagram must be long enough for every entry it declares.
//!
//! There is no other header.  In particular a first byte of `0x01` or `0x02`
//! is a v1 panel count, never a version marker: treating it as one shifts
//! every following byte and produces colors that were never sent.

use thiserror::Error;
use tracing::trace;

use crate::domain::color::Rgb;

/// Bytes in one v1 entry.
pub const V1_ENTRY_LEN: usize = 7;
/// Bytes in one v2 entry.
pub const V2_ENTRY_LEN: usize = 8;

/// Errors that can occur while decoding a streaming datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The datagram carried no bytes at all.
    #[error("empty datagram")]
    Empty,

    /// The header declares zero panels.
    #[error("datagram declares zero panels")]
    NoPanels,

    /// The datagram is shorter than its header says it should be.
    #[error("truncated datagram: {declared} panel(s) need {needed} bytes, got {available}")]
    Truncated {
        declared: usize,
        needed: usize,
        available: usize,
    },
}

/// Which extControl layout a datagram was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVersion {
    V1,
    V2,
}

/// One decoded per-panel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelColor {
    pub panel_id: u16,
    pub color: Rgb,
    /// The fourth (white) channel; MELK strips have no white LEDs.
    pub white: u8,
    /// Transition time in tenths of a second.
    pub transition: u16,
}

/// A successfully decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub version: StreamVersion,
    /// Always non-empty.
    pub panels: Vec<PanelColor>,
}

impl StreamPacket {
    /// The representative color: the first panel's RGB.
    ///
    /// The strips form one broadcast group, so any further panels are
    /// indistinguishable downstream and are ignored.
    pub fn color(&self) -> Rgb {
        self.panels.first().map(|p| p.color).unwrap_or_default()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes one streaming datagram.
///
/// # Errors
///
/// Returns [`StreamError`] when the datagram is empty, declares no panels, or
/// is too short for the panels it declares.
///
/// # Examples
///
/// ```rust
/// use melkoleaf_core::{decode_stream_packet, Rgb, StreamVersion};
///
/// // v2, one panel (id 7) showing orange.
/// let datagram = [0x00, 0x01, 0x00, 0x07, 0xFF, 0x80, 0x00, 0x00, 0x00, 0x01];
/// let packet = decode_stream_packet(&datagram).unwrap();
/// assert_eq!(packet.version, StreamVersion::V2);
/// assert_eq!(packet.color(), Rgb::new(0xFF, 0x80, 0x00));
/// ```
pub fn decode_stream_packet(data: &[u8]) -> Result<StreamPacket, StreamError> {
    let Some(&first) = data.first() else {
        return Err(StreamError::Empty);
    };

    let result = if first == 0 { decode_v2(data) } else { decode_v1(data) };
    if let Ok(packet) = &result {
        trace!(
            version = ?packet.version,
            panels = packet.panels.len(),
            len = data.len(),
            "decoded stream datagram"
        );
    }
    result
}

// ── Layout decoders ───────────────────────────────────────────────────────────

fn decode_v1(data: &[u8]) -> Result<StreamPacket, StreamError> {
    let declared = usize::from(data[0]);
    if declared == 0 {
        return Err(StreamError::NoPanels);
    }
    require_entries(data, 1, declared, V1_ENTRY_LEN)?;

    let panels = data[1..1 + declared * V1_ENTRY_LEN]
        .chunks_exact(V1_ENTRY_LEN)
        .map(|e| PanelColor {
            panel_id: u16::from(e[0]),
            // e[1] is the frame count, always 1 in practice.
            color: Rgb::new(e[2], e[3], e[4]),
            white: e[5],
            transition: u16::from(e[6]),
        })
        .collect();

    Ok(StreamPacket {
        version: StreamVersion::V1,
        panels,
    })
}

fn decode_v2(data: &[u8]) -> Result<StreamPacket, StreamError> {
    if data.len() < 2 {
        return Err(StreamError::Truncated {
            declared: 0,
            needed: 2,
            available: data.len(),
        });
    }
    let declared = usize::from(u16::from_be_bytes([data[0], data[1]]));
    if declared == 0 {
        return Err(StreamError::NoPanels);
    }
    require_entries(data, 2, declared, V2_ENTRY_LEN)?;

    let panels = data[2..2 + declared * V2_ENTRY_LEN]
        .chunks_exact(V2_ENTRY_LEN)
        .map(|e| PanelColor {
            panel_id: u16::from_be_bytes([e[0], e[1]]),
            color: Rgb::new(e[2], e[3], e[4]),
            white: e[5],
            transition: u16::from_be_bytes([e[6], e[7]]),
        })
        .collect();

    Ok(StreamPacket {
        version: StreamVersion::V2,
        panels,
    })
}

fn require_entries(
    data: &[u8],
    header_len: usize,
    declared: usize,
    entry_len: usize,
) -> Result<(), StreamError> {
    let needed = header_len + declared * entry_len;
    if data.len() < needed {
        return Err(StreamError::Truncated {
            declared,
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
