//! Command catalog and serialization.
//!
//! A [`Command`] is a verb from the supported catalog plus its arguments.
//! It serializes to exactly one outgoing [`Frame`]:
//!
//! ```text
//! ["KeyPress", "MENU"]                       -> KeyPress MENU
//! ["KeyPress, MENU"]                         -> KeyPress MENU
//! ["DisplayMessage", "3", "Hello World"]     -> DisplayMessage 3 "Hello World"
//! ```
//!
//! # Catalog
//!
//! | Group | Verbs |
//! |-------|-------|
//! | Power | `PowerOff`, `Standby`, `Restart`, `ReloadSoftware`, `Bye` |
//! | Menu | `OpenMenu`, `CloseMenu`, `KeyPress`, `KeyHold` |
//! | Display | `DisplayAlertWindow`, `CloseAlertWindow`, `DisplayMessage`, `DisplayAudioVolume`, `DisplayAudioMute`, `CloseAudioMute` |
//! | Information | `GetIncomingSignalInfo`, `GetOutgoingSignalInfo`, `GetAspectRatio`, `GetMaskingRatio`, `GetTemperatures`, `GetMacAddress` |
//! | Profiles | `ActivateProfile` |
//! | Other | `ResetTemporary`, `ToneMapOn`, `ToneMapOff`, `Hotplug`, `RefreshLicenseInfo`, `Force1080p60Output`, `Toggle` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use crate::error::{Error, Result};

use super::Frame;

// ============================================================================
// ReplyKind
// ============================================================================

/// What the device sends back for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// A single `OK` line.
    Ack,
    /// `OK` followed by a data line whose title is the given string.
    Data(&'static str),
}

// ============================================================================
// CommandSpec
// ============================================================================

/// Static description of one catalog verb.
#[derive(Debug)]
struct CommandSpec {
    verb: &'static str,
    max_args: usize,
    /// Argument positions sent as quoted text.
    quoted: &'static [usize],
    reply: ReplyKind,
}

const fn ack(verb: &'static str, max_args: usize) -> CommandSpec {
    CommandSpec {
        verb,
        max_args,
        quoted: &[],
        reply: ReplyKind::Ack,
    }
}

const fn query(verb: &'static str, title: &'static str) -> CommandSpec {
    CommandSpec {
        verb,
        max_args: 0,
        quoted: &[],
        reply: ReplyKind::Data(title),
    }
}

static CATALOG: &[CommandSpec] = &[
    // Power
    ack("PowerOff", 0),
    ack("Standby", 0),
    ack("Restart", 0),
    ack("ReloadSoftware", 0),
    ack("Bye", 0),
    // Menu
    ack("OpenMenu", 1),
    ack("CloseMenu", 0),
    ack("KeyPress", 1),
    ack("KeyHold", 1),
    // Display
    CommandSpec {
        verb: "DisplayAlertWindow",
        max_args: 1,
        quoted: &[0],
        reply: ReplyKind::Ack,
    },
    ack("CloseAlertWindow", 0),
    CommandSpec {
        verb: "DisplayMessage",
        max_args: 2,
        quoted: &[1],
        reply: ReplyKind::Ack,
    },
    CommandSpec {
        verb: "DisplayAudioVolume",
        max_args: 4,
        quoted: &[3],
        reply: ReplyKind::Ack,
    },
    ack("DisplayAudioMute", 0),
    ack("CloseAudioMute", 0),
    // Information
    query("GetIncomingSignalInfo", "IncomingSignalInfo"),
    query("GetOutgoingSignalInfo", "OutgoingSignalInfo"),
    query("GetAspectRatio", "AspectRatio"),
    query("GetMaskingRatio", "MaskingRatio"),
    query("GetTemperatures", "Temperatures"),
    query("GetMacAddress", "MacAddress"),
    // Profiles
    ack("ActivateProfile", 2),
    // Other
    ack("ResetTemporary", 0),
    ack("ToneMapOn", 0),
    ack("ToneMapOff", 0),
    ack("Hotplug", 0),
    ack("RefreshLicenseInfo", 0),
    ack("Force1080p60Output", 0),
    ack("Toggle", 1),
];

fn lookup(verb: &str) -> Option<&'static CommandSpec> {
    CATALOG.iter().find(|spec| spec.verb == verb)
}

/// Returns every verb in the catalog.
pub fn supported_verbs() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|spec| spec.verb)
}

// ============================================================================
// Command
// ============================================================================

/// A validated command ready to be written as one frame.
#[derive(Clone)]
pub struct Command {
    spec: &'static CommandSpec,
    args: Vec<String>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("verb", &self.spec.verb)
            .field("args", &self.args)
            .finish()
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.spec.verb == other.spec.verb && self.args == other.args
    }
}

impl Eq for Command {}

// ============================================================================
// Command - Constructors
// ============================================================================

impl Command {
    /// Creates a command with no arguments.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCommand`] if `verb` is not in the catalog.
    pub fn new(verb: &str) -> Result<Self> {
        let spec = lookup(verb.trim()).ok_or_else(|| Error::unknown_command(verb.trim()))?;
        Ok(Self {
            spec,
            args: Vec::new(),
        })
    }

    /// Parses a command from tokens.
    ///
    /// A single token is treated as a comma-joined command
    /// (`"KeyPress, MENU"`); several tokens are taken as verb plus
    /// arguments. Every token is trimmed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the command is empty, has too many
    ///   arguments, or an argument contains a quote or line terminator
    /// - [`Error::UnknownCommand`] if the verb is not in the catalog
    pub fn parse<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .collect();

        let tokens = match tokens.as_slice() {
            [] => return Err(Error::invalid_argument("empty command")),
            [single] => single.split(',').map(|t| t.trim().to_string()).collect(),
            _ => tokens,
        };

        let Some((verb, args)) = tokens.split_first() else {
            return Err(Error::invalid_argument("empty command"));
        };

        if verb.is_empty() {
            return Err(Error::invalid_argument("empty command"));
        }

        let mut command = Self::new(verb)?;
        for arg in args {
            command = command.arg(arg.as_str())?;
        }
        Ok(command)
    }

    /// Parses a comma-joined command line such as `"ActivateProfile, CUSTOM, 2"`.
    ///
    /// # Errors
    ///
    /// Same as [`Command::parse`].
    #[inline]
    pub fn from_line(line: &str) -> Result<Self> {
        Self::parse([line])
    }

    /// Appends an argument.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the argument is empty, contains a quote
    /// or line terminator, or exceeds the verb's argument count.
    pub fn arg(mut self, arg: impl Into<String>) -> Result<Self> {
        let arg = arg.into();

        if self.args.len() >= self.spec.max_args {
            return Err(Error::invalid_argument(format!(
                "{} takes at most {} argument(s)",
                self.spec.verb, self.spec.max_args
            )));
        }

        let arg = unquote(arg.trim()).to_string();
        if arg.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{}: empty argument",
                self.spec.verb
            )));
        }
        if arg.contains(['"', '\r', '\n']) {
            return Err(Error::invalid_argument(format!(
                "{}: argument must not contain quotes or line breaks",
                self.spec.verb
            )));
        }

        self.args.push(arg);
        Ok(self)
    }
}

// ============================================================================
// Command - Typed Helpers
// ============================================================================

impl Command {
    /// `PowerOff`.
    #[must_use]
    pub fn power_off() -> Self {
        Self::builtin("PowerOff")
    }

    /// `Standby`.
    #[must_use]
    pub fn standby() -> Self {
        Self::builtin("Standby")
    }

    /// `Bye`.
    #[must_use]
    pub fn bye() -> Self {
        Self::builtin("Bye")
    }

    /// `KeyPress <key>`, e.g. `MENU`, `UP`, `OK`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the key is not a valid argument.
    pub fn key_press(key: &str) -> Result<Self> {
        Self::builtin("KeyPress").arg(key)
    }

    /// `DisplayMessage <seconds> "<text>"`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the text contains quotes or line breaks.
    pub fn display_message(seconds: u32, text: &str) -> Result<Self> {
        Self::builtin("DisplayMessage")
            .arg(seconds.to_string())?
            .arg(text)
    }

    /// `DisplayAudioVolume <channel> <current> <max> "<unit>"`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the unit contains quotes or line breaks.
    pub fn display_audio_volume(channel: u32, current: u32, max: u32, unit: &str) -> Result<Self> {
        Self::builtin("DisplayAudioVolume")
            .arg(channel.to_string())?
            .arg(current.to_string())?
            .arg(max.to_string())?
            .arg(unit)
    }

    /// `ActivateProfile <group> <index>`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the group is not a valid argument.
    pub fn activate_profile(group: &str, index: u32) -> Result<Self> {
        Self::builtin("ActivateProfile")
            .arg(group)?
            .arg(index.to_string())
    }

    /// The `Get*` queries refreshed after connecting and while polling.
    #[must_use]
    pub fn refresh_queries() -> Vec<Self> {
        [
            "GetMacAddress",
            "GetTemperatures",
            "GetIncomingSignalInfo",
            "GetOutgoingSignalInfo",
            "GetAspectRatio",
            "GetMaskingRatio",
        ]
        .into_iter()
        .map(Self::builtin)
        .collect()
    }

    /// Looks up a verb known to be in the catalog.
    fn builtin(verb: &'static str) -> Self {
        let spec = lookup(verb).unwrap_or(&CATALOG[0]);
        debug_assert_eq!(spec.verb, verb, "builtin verb missing from catalog");
        Self {
            spec,
            args: Vec::new(),
        }
    }
}

// ============================================================================
// Command - Accessors
// ============================================================================

impl Command {
    /// Returns the verb.
    #[inline]
    #[must_use]
    pub fn verb(&self) -> &'static str {
        self.spec.verb
    }

    /// Returns the arguments, unquoted.
    #[inline]
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns `true` for `PowerOff` and `Standby`.
    #[inline]
    #[must_use]
    pub fn is_power_command(&self) -> bool {
        matches!(self.spec.verb, "PowerOff" | "Standby")
    }

    /// Returns what the device is expected to reply.
    #[inline]
    #[must_use]
    pub fn reply_kind(&self) -> ReplyKind {
        self.spec.reply
    }

    /// Serializes the command into its wire frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let mut line = String::from(self.spec.verb);
        for (index, arg) in self.args.iter().enumerate() {
            line.push(' ');
            if self.spec.quoted.contains(&index) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        Frame::new(line)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_frame().as_str())
    }
}

/// Strips one pair of surrounding double quotes.
fn unquote(arg: &str) -> &str {
    arg.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(arg)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(tokens: &[&str]) -> String {
        Command::parse(tokens).expect("parse").to_frame().into_string()
    }

    #[test]
    fn test_comma_joined_commands() {
        assert_eq!(wire(&["KeyPress, MENU"]), "KeyPress MENU");
        assert_eq!(wire(&["OpenMenu, Info"]), "OpenMenu Info");
        assert_eq!(wire(&["ActivateProfile, CUSTOM, 2"]), "ActivateProfile CUSTOM 2");
        assert_eq!(wire(&["KeyPress , MENU"]), "KeyPress MENU");
    }

    #[test]
    fn test_token_list_commands() {
        assert_eq!(wire(&["KeyPress", "SETTINGS"]), "KeyPress SETTINGS");
        assert_eq!(wire(&["ActivateProfile", "SOURCE", "1"]), "ActivateProfile SOURCE 1");
        assert_eq!(wire(&["PowerOff"]), "PowerOff");
        assert_eq!(wire(&["GetMacAddress"]), "GetMacAddress");
    }

    #[test]
    fn test_text_arguments_are_quoted() {
        assert_eq!(
            wire(&["DisplayMessage", "3", "Hello World"]),
            "DisplayMessage 3 \"Hello World\""
        );
        assert_eq!(
            wire(&["DisplayAudioVolume", "0", "75", "100", "percent"]),
            "DisplayAudioVolume 0 75 100 \"percent\""
        );
    }

    #[test]
    fn test_prequoted_argument_is_not_double_quoted() {
        assert_eq!(
            wire(&["DisplayMessage", "3", "\"Hi\""]),
            "DisplayMessage 3 \"Hi\""
        );
    }

    #[test]
    fn test_typed_helpers() {
        let cmd = Command::display_message(5, "Test Message").expect("cmd");
        assert_eq!(cmd.to_string(), "DisplayMessage 5 \"Test Message\"");

        let cmd = Command::activate_profile("CUSTOM", 2).expect("cmd");
        assert_eq!(cmd, Command::from_line("ActivateProfile, CUSTOM, 2").expect("cmd"));

        assert_eq!(Command::power_off().verb(), "PowerOff");
        assert_eq!(Command::standby().verb(), "Standby");
        assert!(Command::power_off().is_power_command());
        assert!(Command::standby().is_power_command());
        assert!(!Command::key_press("MENU").expect("cmd").is_power_command());
    }

    #[test]
    fn test_unknown_verb() {
        let err = Command::parse(["NonExistentCommand"]).unwrap_err();
        assert!(matches!(err, Error::UnknownCommand { .. }));

        let err = Command::parse(["InvalidCommand", "PARAM"]).unwrap_err();
        assert!(matches!(err, Error::UnknownCommand { .. }));
    }

    #[test]
    fn test_empty_command() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            Command::parse(empty).unwrap_err(),
            Error::InvalidArgument { .. }
        ));
        assert!(Command::parse([""]).is_err());
    }

    #[test]
    fn test_too_many_arguments() {
        let err = Command::parse(["PowerOff", "NOW"]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_argument_with_line_break_is_rejected() {
        assert!(Command::display_message(3, "line\nbreak").is_err());
        assert!(Command::display_message(3, "say \"hi\"").is_err());
    }

    #[test]
    fn test_reply_kind() {
        assert_eq!(
            Command::parse(["GetTemperatures"]).expect("cmd").reply_kind(),
            ReplyKind::Data("Temperatures")
        );
        assert_eq!(Command::power_off().reply_kind(), ReplyKind::Ack);
    }

    #[test]
    fn test_refresh_queries_are_data_queries() {
        let queries = Command::refresh_queries();
        assert_eq!(queries.len(), 6);
        assert!(
            queries
                .iter()
                .all(|q| matches!(q.reply_kind(), ReplyKind::Data(_)))
        );
    }

    #[test]
    fn test_every_catalog_verb_parses() {
        for verb in supported_verbs() {
            assert_eq!(Command::new(verb).expect("verb").verb(), verb);
        }
    }
}
