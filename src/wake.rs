//! Wake-on-LAN.
//!
//! A powered-off device has no TCP listener, so power-on goes out of band:
//! a UDP broadcast "magic packet" (6 × `0xFF` followed by the MAC address
//! 16 times) that the network interface recognizes.
//!
//! | Accepted MAC format | Example |
//! |---------------------|---------|
//! | 17 chars, any separator | `01:02:03:04:05:06`, `01-02-03-04-05-06` |
//! | 14 chars, dotted | `0102.0304.0506` |
//! | 12 hex digits | `010203040506` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Length of a magic packet in bytes.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// Default destination for magic packets.
pub const DEFAULT_WAKE_TARGET: &str = "255.255.255.255:9";

// ============================================================================
// MacAddress
// ============================================================================

/// Hardware address of the device's network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Creates an address from raw bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Builds the magic packet for this address.
    #[must_use]
    pub fn magic_packet(&self) -> [u8; MAGIC_PACKET_LEN] {
        let mut packet = [0xFF; MAGIC_PACKET_LEN];
        for chunk in packet[6..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&self.0);
        }
        packet
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        let separator = match trimmed.len() {
            17 => trimmed.chars().nth(2),
            14 => trimmed.chars().nth(4),
            _ => None,
        };
        let digits: String = match separator {
            Some(sep) => trimmed.chars().filter(|c| *c != sep).collect(),
            None => trimmed.to_string(),
        };

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_mac(input));
        }

        let mut bytes = [0u8; 6];
        for (index, byte) in bytes.iter_mut().enumerate() {
            let pair = &digits[index * 2..index * 2 + 2];
            *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::invalid_mac(input))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// WakeTarget
// ============================================================================

/// Whether the session knows how to wake the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeTarget {
    /// No MAC address known; power-on is impossible.
    NoIdentifier,
    /// Wake the device with this address.
    Identifier(MacAddress),
}

impl WakeTarget {
    /// Picks the first known address: learned, then configured, then
    /// supplied at call time.
    #[must_use]
    pub fn resolve(
        learned: Option<MacAddress>,
        configured: Option<MacAddress>,
        call_time: Option<MacAddress>,
    ) -> Self {
        learned
            .or(configured)
            .or(call_time)
            .map_or(Self::NoIdentifier, Self::Identifier)
    }

    /// Returns the address, or [`Error::NoWakeCapability`].
    ///
    /// # Errors
    ///
    /// [`Error::NoWakeCapability`] for [`WakeTarget::NoIdentifier`].
    pub fn mac(self) -> Result<MacAddress> {
        match self {
            Self::Identifier(mac) => Ok(mac),
            Self::NoIdentifier => Err(Error::NoWakeCapability),
        }
    }
}

// ============================================================================
// Sending
// ============================================================================

/// Broadcasts a magic packet for `mac` to `target`.
///
/// # Errors
///
/// [`Error::Io`] if the UDP socket cannot be bound or the send fails.
pub async fn send_magic_packet(mac: MacAddress, target: SocketAddr) -> Result<()> {
    let bind: SocketAddr = if target.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.set_broadcast(true)?;
    socket.send_to(&mac.magic_packet(), target).await?;

    debug!(mac = %mac, target = %target, "Sent magic packet");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
