//! Builder pattern for session configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use madvr_client::{Session, SessionOptions};
//!
//! # fn example() -> madvr_client::Result<()> {
//! let session = Session::builder()
//!     .host("192.168.1.50")
//!     .mac("01:02:03:04:05:06")
//!     .options(SessionOptions::new().with_poll_interval(Duration::from_secs(30)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::wake::MacAddress;

use super::core::Session;
use super::options::SessionOptions;

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for a [`Session`].
///
/// Use [`Session::builder()`] to create one.
#[derive(Debug, Default, Clone)]
pub struct SessionBuilder {
    host: Option<String>,
    port: Option<u16>,
    /// Unparsed until `build`.
    mac: Option<String>,
    options: SessionOptions,
}

impl SessionBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the device host name or IP address. Required.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the control port, overriding [`SessionOptions::port`].
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the MAC address used for Wake-on-LAN, in any accepted format.
    ///
    /// Parsed by [`build`](Self::build).
    #[inline]
    #[must_use]
    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    /// Sets the MAC address used for Wake-on-LAN.
    #[inline]
    #[must_use]
    pub fn mac_address(mut self, mac: MacAddress) -> Self {
        self.mac = Some(mac.to_string());
        self
    }

    /// Replaces all timing and sizing options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the configuration and creates the session.
    ///
    /// No connection is made until [`Session::open_connection`].
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the host is missing or malformed, the MAC
    /// address does not parse, or the options are inconsistent.
    pub fn build(self) -> Result<Session> {
        let host = self.validate_host()?;
        let configured_mac = self.validate_mac()?;

        let mut options = self.options;
        if let Some(port) = self.port {
            options.port = port;
        }
        options.validate()?;

        let addr = if host.contains(':') {
            format!("[{host}]:{}", options.port)
        } else {
            format!("{host}:{}", options.port)
        };

        Ok(Session::from_parts(host, addr, options, configured_mac))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionBuilder {
    fn validate_host(&self) -> Result<String> {
        let host = self.host.as_deref().map(str::trim).unwrap_or_default();

        if host.is_empty() {
            return Err(Error::config(
                "device host is required. Use .host() to set it.\n\
                 Example: Session::builder().host(\"192.168.1.50\")",
            ));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(Error::config(format!("invalid device host {host:?}")));
        }

        Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
    }

    fn validate_mac(&self) -> Result<Option<MacAddress>> {
        self.mac
            .as_deref()
            .map(|raw| {
                raw.parse()
                    .map_err(|_| Error::config(format!("invalid MAC address {raw:?}")))
            })
            .transpose()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::options::DEFAULT_PORT;

    #[test]
    fn test_host_required() {
        let err = SessionBuilder::new().build().err().expect("error");
        assert!(matches!(err, Error::Config { .. }));

        let err = Session::builder().host("  ").build().err().expect("error");
        assert!(matches!(err, Error::Config { .. }));

        let err = Session::builder().host("my device").build().err().expect("error");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_addr_formatting() {
        let session = Session::builder().host("10.0.0.5").build().expect("session");
        assert_eq!(session.addr(), format!("10.0.0.5:{DEFAULT_PORT}"));

        let session = Session::builder()
            .host("fe80::1")
            .port(4000)
            .build()
            .expect("session");
        assert_eq!(session.host(), "fe80::1");
        assert_eq!(session.addr(), "[fe80::1]:4000");
        assert_eq!(session.options().port, 4000);
    }

    #[test]
    fn test_mac_parsed_at_build() {
        assert!(
            Session::builder()
                .host("10.0.0.5")
                .mac("01-02-03-04-05-06")
                .build()
                .is_ok()
        );

        let err = Session::builder()
            .host("10.0.0.5")
            .mac("not-a-mac")
            .build()
            .err()
            .expect("error");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let err = Session::builder()
            .host("10.0.0.5")
            .port(0)
            .build()
            .err()
            .expect("error");
        assert!(matches!(err, Error::Config { .. }));
    }
}
