//! Matching device replies to the command that caused them.
//!
//! A command connection carries one command at a time, but the device can
//! still push unrelated lines (echoes, status broadcasts) between the
//! command and its reply. [`ReplyMatcher`] decides, line by line, which
//! frames belong to the reply.

// ============================================================================
// Imports
// ============================================================================

use super::{Command, Frame, ReplyKind};

// ============================================================================
// Reply
// ============================================================================

/// Frames that make up the device's answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    frames: Vec<Frame>,
}

impl Reply {
    /// Returns all reply frames in arrival order.
    #[inline]
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Returns the data line of a `Get*` query, if any.
    #[must_use]
    pub fn data(&self) -> Option<&Frame> {
        self.frames.iter().find(|f| f.title() != "OK")
    }

    /// Consumes the reply, returning its frames.
    #[inline]
    #[must_use]
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

// ============================================================================
// ReplyMatcher
// ============================================================================

/// Outcome of feeding one frame to a [`ReplyMatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The frame belongs to the reply, more frames are expected.
    Pending,
    /// The reply is complete.
    Complete(Reply),
    /// The device answered `ERROR`; carries the text after it.
    Rejected(String),
    /// The frame is not part of the reply.
    Unrelated(Frame),
}

/// Incremental matcher for one in-flight command.
#[derive(Debug)]
pub struct ReplyMatcher {
    kind: ReplyKind,
    acked: bool,
    frames: Vec<Frame>,
}

impl ReplyMatcher {
    /// Creates a matcher for `command`.
    #[must_use]
    pub fn new(command: &Command) -> Self {
        Self {
            kind: command.reply_kind(),
            acked: false,
            frames: Vec::with_capacity(2),
        }
    }

    /// Feeds the next frame read from the connection.
    pub fn accept(&mut self, frame: Frame) -> MatchOutcome {
        match (frame.title(), self.kind) {
            ("ERROR", _) => MatchOutcome::Rejected(frame.body().to_string()),
            ("OK", _) if !self.acked => {
                self.acked = true;
                self.frames.push(frame);
                self.outcome()
            }
            (title, ReplyKind::Data(expected)) if title == expected && !self.has_data() => {
                self.frames.push(frame);
                self.outcome()
            }
            _ => MatchOutcome::Unrelated(frame),
        }
    }

    fn has_data(&self) -> bool {
        self.frames.iter().any(|f| f.title() != "OK")
    }

    fn outcome(&mut self) -> MatchOutcome {
        let complete = match self.kind {
            ReplyKind::Ack => self.acked,
            ReplyKind::Data(_) => self.acked && self.has_data(),
        };

        if complete {
            MatchOutcome::Complete(Reply {
                frames: std::mem::take(&mut self.frames),
            })
        } else {
            MatchOutcome::Pending
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
