//! Panel layout reported to the upstream controller.
//!
//! The upstream protocol assumes a set of addressable panels with positions.
//! The MELK strips have no such concept, so the bridge always reports a single
//! panel at the origin; the controller then streams exactly one color, which
//! is what the broadcast group can show anyway.

use serde::{Deserialize, Serialize};

/// Edge length reported for the single emulated panel.
pub const PANEL_SIDE_LENGTH: u32 = 100;

/// Panel id reported for the single emulated panel.
pub const PANEL_ID: u16 = 1;

/// Position of one panel in the emulated layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelPosition {
    pub panel_id: u16,
    pub x: i32,
    pub y: i32,
    /// Orientation in degrees.
    pub o: i32,
    pub shape_type: u8,
}

/// Static, read-only layout metadata for introspection calls.
///
/// Serialises to the shape the controller expects:
///
/// ```json
/// { "numPanels": 1, "sideLength": 100,
///   "positionData": [{ "panelId": 1, "x": 0, "y": 0, "o": 0, "shapeType": 0 }] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelLayoutDescriptor {
    pub num_panels: usize,
    pub side_length: u32,
    pub position_data: Vec<PanelPosition>,
}

impl PanelLayoutDescriptor {
    /// The one-panel layout the bridge always reports.
    pub fn single_panel() -> Self {
        Self {
            num_panels: 1,
            side_length: PANEL_SIDE_LENGTH,
            position_data: vec![PanelPosition {
                panel_id: PANEL_ID,
                x: 0,
                y: 0,
                o: 0,
                shape_type: 0,
            }],
        }
    }
}

impl Default for PanelLayoutDescriptor {
    fn default() -> Self {
        Self::single_panel()
    }
}
