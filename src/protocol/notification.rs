//! Classification of unsolicited device output.
//!
//! Every line the device pushes on the notification connection is mapped to
//! a [`Notification`]. Field-level parsing of status lines happens in
//! [`DeviceStatus::apply`](super::DeviceStatus::apply).
//!
//! | Line | Notification |
//! |------|--------------|
//! | `WELCOME to Envy v1.1.3` | [`Notification::Welcome`] |
//! | `OK` | [`Notification::Ack`] (also the heartbeat reply) |
//! | `ERROR "bad"` | [`Notification::Error`] |
//! | `PowerOff` / `Standby` | power events |
//! | `NoSignal` | [`Notification::NoSignal`] |
//! | `IncomingSignalInfo 3840x2160 ...` | [`Notification::Status`] |
//! | `KeyPress MENU` | [`Notification::Echo`] |

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use super::Frame;

// ============================================================================
// Constants
// ============================================================================

/// Marker contained in the greeting line of every new session.
pub const WELCOME_MARKER: &str = "WELCOME";

/// Keep-alive line understood by the device.
pub const HEARTBEAT: &str = "Heartbeat";

/// Titles of lines that carry device state.
const STATUS_TITLES: &[&str] = &[
    "IncomingSignalInfo",
    "OutgoingSignalInfo",
    "AspectRatio",
    "MaskingRatio",
    "ActivateProfile",
    "ActiveProfile",
    "MacAddress",
    "Temperatures",
];

// ============================================================================
// Notification
// ============================================================================

/// A classified line of device output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Session greeting.
    Welcome {
        /// Full greeting line.
        banner: String,
    },
    /// `OK`: command accepted or heartbeat answered.
    Ack,
    /// `ERROR`: the last command was rejected.
    Error {
        /// Text after `ERROR`.
        message: String,
    },
    /// Device is powering off.
    PowerOff,
    /// Device is entering standby.
    Standby,
    /// Input signal lost.
    NoSignal,
    /// A state report with a known title.
    Status {
        /// Line title, e.g. `Temperatures`.
        title: String,
        /// Whitespace-separated parameters, quotes removed.
        params: Vec<String>,
    },
    /// Anything else: echoes of commands issued from any client.
    Echo {
        /// The raw line.
        line: String,
    },
}

impl Notification {
    /// Classifies one frame.
    #[must_use]
    pub fn classify(frame: &Frame) -> Self {
        let line = frame.as_str().trim();
        let title = frame.title();

        if line.contains(WELCOME_MARKER) {
            return Self::Welcome {
                banner: line.to_string(),
            };
        }

        match title {
            "OK" => Self::Ack,
            "ERROR" => Self::Error {
                message: unquote(frame.body()).to_string(),
            },
            "PowerOff" => Self::PowerOff,
            "Standby" => Self::Standby,
            "NoSignal" => Self::NoSignal,
            t if STATUS_TITLES.contains(&t) => Self::Status {
                title: t.to_string(),
                params: tokenize(frame.body()),
            },
            _ => Self::Echo {
                line: line.to_string(),
            },
        }
    }

    /// Returns `true` for `PowerOff` and `Standby`.
    #[inline]
    #[must_use]
    pub fn is_power_event(&self) -> bool {
        matches!(self, Self::PowerOff | Self::Standby)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Splits a parameter list on whitespace, keeping quoted runs together.
#[must_use]
pub fn tokenize(body: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in body.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                if !in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(text)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(line: &str) -> Notification {
        Notification::classify(&Frame::new(line))
    }

    #[test]
    fn test_classify_control_lines() {
        assert!(matches!(
            classify("WELCOME to Envy v1.1.3"),
            Notification::Welcome { .. }
        ));
        assert_eq!(classify("OK"), Notification::Ack);
        assert_eq!(
            classify("ERROR \"unknown command\""),
            Notification::Error {
                message: "unknown command".into()
            }
        );
    }

    #[test]
    fn test_classify_power_events() {
        assert!(classify("PowerOff").is_power_event());
        assert!(classify("Standby").is_power_event());
        assert!(!classify("NoSignal").is_power_event());
    }

    #[test]
    fn test_classify_status() {
        let n = classify("AspectRatio 3840:2160 1.778 178 \"16:9\"");
        assert_eq!(
            n,
            Notification::Status {
                title: "AspectRatio".into(),
                params: vec!["3840:2160".into(), "1.778".into(), "178".into(), "16:9".into()],
            }
        );
    }

    #[test]
    fn test_classify_echo() {
        assert_eq!(
            classify("KeyPress MENU"),
            Notification::Echo {
                line: "KeyPress MENU".into()
            }
        );
        assert!(matches!(classify("ResetTemporary"), Notification::Echo { .. }));
    }

    #[test]
    fn test_tokenize_quoted_run_with_spaces() {
        assert_eq!(
            tokenize("\"Movie Night\" 3"),
            vec!["Movie Night".to_string(), "3".to_string()]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_notification_serializes_with_kind_tag() {
        let json = serde_json::to_value(Notification::PowerOff).expect("json");
        assert_eq!(json["kind"], "power_off");
    }
}
