//! Request and response schemas for the emulated Nanoleaf OpenAPI.
//!
//! Every route has an explicit type here.  Bodies are deserialised at the
//! HTTP boundary; anything that does not fit is rejected there with an
//! [`ApiError`] instead of failing deeper in the handler.

use serde::{Deserialize, Serialize};

use melkoleaf_core::{parse_static_anim_data, PanelLayoutDescriptor, Rgb};

/// Name reported to the controller.
pub const DEVICE_NAME: &str = "Nanoleaf Canvas";
/// Model number of a Nanoleaf Canvas.
pub const DEVICE_MODEL: &str = "NL22";
pub const FIRMWARE_VERSION: &str = "3.2.0";
pub const MANUFACTURER: &str = "Nanoleaf";

/// Effect name while the controller is streaming.
pub const EFFECT_EXT_CONTROL: &str = "*ExtControl*";
/// Effect name otherwise.
pub const EFFECT_SOLID: &str = "Solid";

// ── Responses ─────────────────────────────────────────────────────────────────

/// Unauthenticated device description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub model: String,
    pub firmware_version: String,
    pub id: String,
    pub serial_no: String,
    pub serial_number: String,
    pub manufacturer: String,
}

impl DeviceInfo {
    pub fn new(device_id: &str) -> Self {
        Self {
            name: DEVICE_NAME.to_string(),
            model: DEVICE_MODEL.to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            id: device_id.to_string(),
            serial_no: device_id.to_string(),
            serial_number: device_id.to_string(),
            manufacturer: MANUFACTURER.to_string(),
        }
    }
}

/// `{"value": …}` wrapper used throughout the OpenAPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value<T> {
    pub value: T,
}

impl<T> Value<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

/// Power/brightness/hue/saturation.  The strips are always on and at full
/// brightness from the controller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub on: Value<bool>,
    pub brightness: Value<u8>,
    pub hue: Value<u16>,
    pub sat: Value<u8>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            on: Value::new(true),
            brightness: Value::new(100),
            hue: Value::new(0),
            sat: Value::new(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectsInfo {
    pub select: String,
    pub list: Vec<String>,
    pub effects_list: Vec<String>,
}

impl EffectsInfo {
    pub fn new(streaming: bool) -> Self {
        let list = vec![EFFECT_SOLID.to_string(), EFFECT_EXT_CONTROL.to_string()];
        Self {
            select: current_effect(streaming).to_string(),
            effects_list: list.clone(),
            list,
        }
    }
}

/// Name of the effect the controller should believe is running.
pub fn current_effect(streaming: bool) -> &'static str {
    if streaming {
        EFFECT_EXT_CONTROL
    } else {
        EFFECT_SOLID
    }
}

/// `{"layout": {...}}` as nested under `panelLayout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelLayoutInfo {
    pub layout: PanelLayoutDescriptor,
}

/// Authenticated device description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullDeviceInfo {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub state: DeviceState,
    pub effects: EffectsInfo,
    pub panel_layout: PanelLayoutInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectName {
    pub effect_name: String,
}

/// Response to `/api/v1/new`.  Both keys are sent; clients differ in which
/// one they read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTokenResponse {
    pub auth_token: String,
    pub token: String,
}

/// Tells a v1 controller where to send datagrams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHandoff {
    pub stream_control_ip_addr: String,
    pub stream_control_port: u16,
    pub stream_control_protocol: String,
}

/// Structured error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self {
            error: "unauthorized".to_string(),
            detail: None,
        }
    }

    pub fn invalid_body(detail: impl Into<String>) -> Self {
        Self {
            error: "invalid request body".to_string(),
            detail: Some(detail.into()),
        }
    }
}

// ── PUT effects ───────────────────────────────────────────────────────────────

/// Body of `PUT /api/v1/{token}/effects`.
///
/// Controllers either wrap the command in `write` or send its fields at the
/// top level, so both shapes are accepted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EffectsRequest {
    pub select: Option<String>,
    pub write: Option<EffectWrite>,
    #[serde(flatten)]
    pub inline: EffectWrite,
}

/// The `write` command of an effects request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectWrite {
    pub command: Option<String>,
    pub anim_type: Option<String>,
    pub ext_control_version: Option<String>,
    pub anim_data: Option<String>,
    #[serde(alias = "red")]
    pub r: Option<f64>,
    #[serde(alias = "green")]
    pub g: Option<f64>,
    #[serde(alias = "blue")]
    pub b: Option<f64>,
}

/// extControl protocol generation requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtControlVersion {
    /// Stream address is returned in the response body.
    V1,
    /// Fixed stream port; the controller only expects `204 No Content`.
    V2,
}

/// What an effects request asks the bridge to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectAction {
    /// Select a named effect.  Acknowledged, nothing else happens.
    Select(String),
    /// Begin extControl streaming.
    StartStream(ExtControlVersion),
    /// Show one solid color.
    StaticColor(Rgb),
    /// Nothing the bridge understands; acknowledged with an empty body.
    Ignored,
}

impl EffectsRequest {
    /// Decides what the request means.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use melkoleaf_bridge::domain::api::{EffectAction, EffectsRequest, ExtControlVersion};
    ///
    /// let body = r#"{"write":{"command":"display","animType":"extControl","extControlVersion":"v2"}}"#;
    /// let request: EffectsRequest = serde_json::from_str(body).unwrap();
    /// assert_eq!(request.action(), EffectAction::StartStream(ExtControlVersion::V2));
    /// ```
    pub fn action(&self) -> EffectAction {
        if let (Some(name), None) = (&self.select, &self.write) {
            return EffectAction::Select(name.clone());
        }

        let write = self.write.as_ref().unwrap_or(&self.inline);

        if write.anim_type.as_deref() == Some("extControl") {
            let version = match write.ext_control_version.as_deref() {
                Some("v2") => ExtControlVersion::V2,
                _ => ExtControlVersion::V1,
            };
            return EffectAction::StartStream(version);
        }

        if let Some(color) = write.anim_data.as_deref().and_then(parse_static_anim_data) {
            return EffectAction::StaticColor(color);
        }

        if write.r.is_some() || write.g.is_some() || write.b.is_some() {
            let channel = |v: Option<f64>| v.map_or(0, |v| v.round() as i64);
            return EffectAction::StaticColor(Rgb::clamped(
                channel(write.r),
                channel(write.g),
                channel(write.b),
            ));
        }

        EffectAction::Ignored
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> EffectsRequest {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_select_only_is_acknowledged() {
        assert_eq!(
            parse(r#"{"select":"Solid"}"#).action(),
            EffectAction::Select("Solid".to_string())
        );
    }

    #[test]
    fn test_ext_control_v2_starts_stream() {
        let body = r#"{"write":{"command":"display","animType":"extControl","extControlVersion":"v2"}}"#;
        assert_eq!(
            parse(body).action(),
            EffectAction::StartStream(ExtControlVersion::V2)
        );
    }

    #[test]
    fn test_ext_control_without_version_is_v1() {
        let body = r#"{"write":{"command":"display","animType":"extControl"}}"#;
        assert_eq!(
            parse(body).action(),
            EffectAction::StartStream(ExtControlVersion::V1)
        );
    }

    #[test]
    fn test_inline_write_fields_are_accepted() {
        let body = r#"{"command":"display","animType":"extControl","extControlVersion":"v2"}"#;
        assert_eq!(
            parse(body).action(),
            EffectAction::StartStream(ExtControlVersion::V2)
        );
    }

    #[test]
    fn test_static_anim_data_becomes_color() {
        // Arrange
        let body = r#"{"write":{"command":"display","animType":"static","animData":"1 1 1 0 0 255 0 1"}}"#;

        // Act
        let action = parse(body).action();

        // Assert
        assert_eq!(action, EffectAction::StaticColor(Rgb::new(0, 0, 255)));
    }

    #[test]
    fn test_direct_channels_are_clamped() {
        let body = r#"{"write":{"r":300,"green":12.4}}"#;
        assert_eq!(
            parse(body).action(),
            EffectAction::StaticColor(Rgb::new(255, 12, 0))
        );
    }

    #[test]
    fn test_select_with_write_uses_write() {
        let body = r#"{"select":"x","write":{"animType":"extControl","extControlVersion":"v2"}}"#;
        assert_eq!(
            parse(body).action(),
            EffectAction::StartStream(ExtControlVersion::V2)
        );
    }

    #[test]
    fn test_empty_object_is_ignored() {
        assert_eq!(parse("{}").action(), EffectAction::Ignored);
    }

    #[test]
    fn test_wrong_field_type_is_rejected() {
        let result: Result<EffectsRequest, _> = serde_json::from_str(r#"{"write":{"r":"red"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_full_info_flattens_device_fields() {
        // Arrange
        let full = FullDeviceInfo {
            info: DeviceInfo::new("dev-1"),
            state: DeviceState::default(),
            effects: EffectsInfo::new(true),
            panel_layout: PanelLayoutInfo {
                layout: PanelLayoutDescriptor::single_panel(),
            },
        };

        // Act
        let json = serde_json::to_value(&full).unwrap();

        // Assert
        assert_eq!(json["name"], "Nanoleaf Canvas");
        assert_eq!(json["serialNo"], "dev-1");
        assert_eq!(json["state"]["brightness"]["value"], 100);
        assert_eq!(json["effects"]["select"], "*ExtControl*");
        assert_eq!(json["effects"]["effectsList"][1], "*ExtControl*");
        assert_eq!(json["panelLayout"]["layout"]["numPanels"], 1);
    }

    #[test]
    fn test_api_error_omits_missing_detail() {
        let json = serde_json::to_string(&ApiError::unauthorized()).unwrap();
        assert_eq!(json, r#"{"error":"unauthorized"}"#);
    }
}
