//! Device line protocol.
//!
//! The device speaks newline-terminated ASCII. Commands go out as a verb
//! followed by space-separated arguments; replies are `OK` / `ERROR`, with
//! `Get*` queries followed by a data line named after the query.
//!
//! | Direction | Example |
//! |-----------|---------|
//! | Local → Device | `KeyPress MENU` |
//! | Device → Local | `OK` |
//! | Local → Device | `GetTemperatures` |
//! | Device → Local | `OK`, then `Temperatures 80 57 41 45` |
//! | Device → Local (unsolicited) | `PowerOff` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | [`Frame`] and the [`LineCodec`] |
//! | `command` | Command catalog and serialization |
//! | `notification` | Classification of device output |
//! | `reply` | Matching replies to the command in flight |
//! | `status` | [`DeviceStatus`] folded from status lines |

// ============================================================================
// Submodules
// ============================================================================

/// Command catalog and serialization.
pub mod command;

/// Line frames and the newline codec.
pub mod frame;

/// Classification of unsolicited device output.
pub mod notification;

/// Reply matching.
pub mod reply;

/// Structured device state.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, ReplyKind, supported_verbs};
pub use frame::{DEFAULT_MAX_FRAME_LEN, Frame, LineCodec};
pub use notification::{HEARTBEAT, Notification, WELCOME_MARKER};
pub use reply::{MatchOutcome, Reply, ReplyMatcher};
pub use status::{ActiveProfile, DeviceStatus, Ratio, SignalInfo, Temperatures};
