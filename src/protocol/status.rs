//! Structured device state folded from status notifications.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

use super::Notification;

// ============================================================================
// Status Records
// ============================================================================

/// `Temperatures <gpu> <hdmi> <cpu> <mainboard>` in degrees Celsius.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Temperatures {
    /// GPU temperature.
    pub gpu: i32,
    /// HDMI input board temperature.
    pub hdmi: i32,
    /// CPU temperature.
    pub cpu: i32,
    /// Mainboard temperature.
    pub mainboard: i32,
}

/// `IncomingSignalInfo` / `OutgoingSignalInfo` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalInfo {
    /// e.g. `3840x2160`.
    pub resolution: String,
    /// e.g. `59.940p`.
    pub frame_rate: String,
    /// `2D` or `3D`.
    pub signal_type: String,
    /// e.g. `420`, `RGB`.
    pub color_space: String,
    /// e.g. `10bit`.
    pub bit_depth: String,
    /// HDR flag field contains `HDR`.
    pub hdr: bool,
    /// e.g. `2020`, `709`.
    pub colorimetry: String,
    /// e.g. `TV`, `PC`.
    pub black_levels: String,
    /// Aspect ratio of the incoming signal; absent for outgoing.
    pub aspect_ratio: Option<String>,
}

/// `AspectRatio` / `MaskingRatio` fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ratio {
    /// e.g. `3840:2160`.
    pub resolution: String,
    /// e.g. `1.778`.
    pub decimal: f64,
    /// e.g. `178`.
    pub integer: String,
    /// Named ratio such as `16:9`; only reported for `AspectRatio`.
    pub name: Option<String>,
}

/// `ActivateProfile` / `ActiveProfile` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveProfile {
    /// Profile group name.
    pub name: String,
    /// Profile number within the group.
    pub number: String,
}

// ============================================================================
// DeviceStatus
// ============================================================================

/// Latest known device state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceStatus {
    /// Device is believed to be powered on.
    pub is_on: bool,
    /// `Some(false)` after `NoSignal`, `Some(true)` after incoming signal info.
    pub is_signal: Option<bool>,
    /// MAC address reported by the device.
    pub mac_address: Option<String>,
    /// Board temperatures.
    pub temperatures: Option<Temperatures>,
    /// Incoming video signal.
    pub incoming_signal: Option<SignalInfo>,
    /// Outgoing video signal.
    pub outgoing_signal: Option<SignalInfo>,
    /// Detected aspect ratio.
    pub aspect_ratio: Option<Ratio>,
    /// Masking ratio.
    pub masking_ratio: Option<Ratio>,
    /// Active profile.
    pub profile: Option<ActiveProfile>,
}

impl DeviceStatus {
    /// Folds a notification into the status.
    ///
    /// Returns `Ok(true)` if anything changed.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if a known status line is missing fields or has
    /// an unparseable number. The status is left untouched in that case.
    pub fn apply(&mut self, notification: &Notification) -> Result<bool> {
        let before = self.clone();

        match notification {
            Notification::PowerOff | Notification::Standby => self.mark_off(),
            Notification::NoSignal => self.is_signal = Some(false),
            Notification::Status { title, params } => self.apply_status(title, params)?,
            _ => return Ok(false),
        }

        Ok(*self != before)
    }

    /// Clears everything except the MAC address and marks the device off.
    pub fn mark_off(&mut self) {
        let mac_address = self.mac_address.take();
        *self = Self {
            mac_address,
            ..Self::default()
        };
    }

    /// Returns the status as a JSON value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    fn apply_status(&mut self, title: &str, params: &[String]) -> Result<()> {
        let field = |index: usize| -> Result<String> {
            params.get(index).cloned().ok_or_else(|| {
                Error::protocol(format!("{title}: missing field {index} in {params:?}"))
            })
        };

        match title {
            "MacAddress" => {
                self.mac_address = Some(field(0)?);
            }
            "Temperatures" => {
                let temp = |index: usize| -> Result<i32> {
                    let raw = field(index)?;
                    raw.parse()
                        .map_err(|_| Error::protocol(format!("{title}: bad temperature {raw:?}")))
                };
                self.temperatures = Some(Temperatures {
                    gpu: temp(0)?,
                    hdmi: temp(1)?,
                    cpu: temp(2)?,
                    mainboard: temp(3)?,
                });
            }
            "IncomingSignalInfo" => {
                let signal = Self::parse_signal(&field, Some(field(8)?))?;
                self.incoming_signal = Some(signal);
                self.is_signal = Some(true);
            }
            "OutgoingSignalInfo" => {
                self.outgoing_signal = Some(Self::parse_signal(&field, None)?);
            }
            "AspectRatio" => {
                self.aspect_ratio = Some(Self::parse_ratio(title, &field, Some(field(3)?))?);
            }
            "MaskingRatio" => {
                self.masking_ratio = Some(Self::parse_ratio(title, &field, None)?);
            }
            "ActivateProfile" | "ActiveProfile" => {
                self.profile = Some(ActiveProfile {
                    name: field(0)?,
                    number: field(1)?,
                });
            }
            _ => {}
        }

        Ok(())
    }

    fn parse_signal(
        field: &dyn Fn(usize) -> Result<String>,
        aspect_ratio: Option<String>,
    ) -> Result<SignalInfo> {
        Ok(SignalInfo {
            resolution: field(0)?,
            frame_rate: field(1)?,
            signal_type: field(2)?,
            color_space: field(3)?,
            bit_depth: field(4)?,
            hdr: field(5)?.contains("HDR"),
            colorimetry: field(6)?,
            black_levels: field(7)?,
            aspect_ratio,
        })
    }

    fn parse_ratio(
        title: &str,
        field: &dyn Fn(usize) -> Result<String>,
        name: Option<String>,
    ) -> Result<Ratio> {
        let raw = field(1)?;
        let decimal = raw
            .parse()
            .map_err(|_| Error::protocol(format!("{title}: bad ratio {raw:?}")))?;
        Ok(Ratio {
            resolution: field(0)?,
            decimal,
            integer: field(2)?,
            name,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::Frame;

    fn apply(status: &mut DeviceStatus, line: &str) -> Result<bool> {
        status.apply(&Notification::classify(&Frame::new(line)))
    }

    #[test]
    fn test_incoming_signal() {
        let mut status = DeviceStatus::default();
        let changed = apply(
            &mut status,
            "IncomingSignalInfo 3840x2160 23.976p 2D 422 10bit HDR10 2020 TV 16:9",
        )
        .expect("apply");
        assert!(changed);

        let signal = status.incoming_signal.as_ref().expect("signal");
        assert_eq!(signal.resolution, "3840x2160");
        assert!(signal.hdr);
        assert_eq!(signal.aspect_ratio.as_deref(), Some("16:9"));
        assert_eq!(status.is_signal, Some(true));
    }

    #[test]
    fn test_outgoing_signal_sdr() {
        let mut status = DeviceStatus::default();
        apply(
            &mut status,
            "OutgoingSignalInfo 4096x2160 59.940p 2D RGB 8bit SDR 709 TV",
        )
        .expect("apply");
        let signal = status.outgoing_signal.expect("signal");
        assert!(!signal.hdr);
        assert!(signal.aspect_ratio.is_none());
    }

    #[test]
    fn test_aspect_and_masking() {
        let mut status = DeviceStatus::default();
        apply(&mut status, "AspectRatio 1272:0525 2.423 240 \"Panavision\"").expect("apply");
        apply(&mut status, "MaskingRatio 4092:1689 2.423 240").expect("apply");

        let aspect = status.aspect_ratio.expect("aspect");
        assert!((aspect.decimal - 2.423).abs() < f64::EPSILON);
        assert_eq!(aspect.name.as_deref(), Some("Panavision"));
        assert!(status.masking_ratio.expect("masking").name.is_none());
    }

    #[test]
    fn test_temperatures_and_mac() {
        let mut status = DeviceStatus::default();
        apply(&mut status, "Temperatures 80 57 41 45").expect("apply");
        apply(&mut status, "MacAddress 01-02-03-04-05-06").expect("apply");

        assert_eq!(
            status.temperatures,
            Some(Temperatures {
                gpu: 80,
                hdmi: 57,
                cpu: 41,
                mainboard: 45
            })
        );
        assert_eq!(status.mac_address.as_deref(), Some("01-02-03-04-05-06"));
    }

    #[test]
    fn test_malformed_status_is_error_and_leaves_state() {
        let mut status = DeviceStatus::default();
        let err = apply(&mut status, "Temperatures 80 57").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(status.temperatures.is_none());

        assert!(apply(&mut status, "AspectRatio 1:1 wide 100 \"x\"").is_err());
        assert!(status.aspect_ratio.is_none());
    }

    #[test]
    fn test_power_off_keeps_mac() {
        let mut status = DeviceStatus {
            is_on: true,
            mac_address: Some("01-02-03-04-05-06".into()),
            ..DeviceStatus::default()
        };
        apply(&mut status, "Temperatures 80 57 41 45").expect("apply");

        assert!(apply(&mut status, "PowerOff").expect("apply"));
        assert!(!status.is_on);
        assert!(status.temperatures.is_none());
        assert_eq!(status.mac_address.as_deref(), Some("01-02-03-04-05-06"));
    }

    #[test]
    fn test_unchanged_status_reports_false() {
        let mut status = DeviceStatus::default();
        assert!(apply(&mut status, "ActiveProfile SOURCE 1").expect("apply"));
        assert!(!apply(&mut status, "ActiveProfile SOURCE 1").expect("apply"));
        assert!(!apply(&mut status, "OK").expect("apply"));
    }

    #[test]
    fn test_to_json() {
        let status = DeviceStatus {
            is_on: true,
            ..DeviceStatus::default()
        };
        let json = status.to_json();
        assert_eq!(json["is_on"], true);
        assert!(json["temperatures"].is_null());
    }
}
