//! Close status codes carried in the first two bytes of a close frame payload.
//!
//! See [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).

/// Status code indicating why an endpoint is closing the connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away (server shutdown, page navigation).
    Away,
    /// 1002: the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present. Never sent on the wire.
    Status,
    /// 1006: the connection was closed abnormally. Never sent on the wire.
    Abnormal,
    /// 1007: a message contained data inconsistent with its type (e.g. non UTF-8 text).
    Invalid,
    /// 1008: a message violated the endpoint's policy.
    Policy,
    /// 1009: a message was too big to process.
    Size,
    /// 1010: the client expected the server to negotiate an extension.
    Extension,
    /// 1011: the server encountered an unexpected condition.
    Error,
    /// 1012: the server is restarting.
    Restart,
    /// 1013: the server is overloaded, try again later.
    Again,
    /// 1015: the TLS handshake failed. Never sent on the wire.
    Tls,
    /// 1004, 1016..=2999: reserved by the protocol.
    Reserved(u16),
    /// 3000..=3999: registered with IANA by libraries and frameworks.
    Iana(u16),
    /// 4000..=4999: private use by applications.
    Library(u16),
    /// 0..=999 and 5000 and above: not valid on the wire.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if the code may legitimately appear in a received close frame.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            Self::Status | Self::Abnormal | Self::Tls | Self::Reserved(_) | Self::Bad(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1015 => Self::Tls,
            1004 | 1014 | 1016..=2999 => Self::Reserved(code),
            3000..=3999 => Self::Iana(code),
            4000..=4999 => Self::Library(code),
            _ => Self::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes_round_trip() {
        for code in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
            assert!(CloseCode::from(code).is_allowed());
        }
    }

    #[test]
    fn test_ranges() {
        assert_eq!(CloseCode::from(1004), CloseCode::Reserved(1004));
        assert_eq!(CloseCode::from(3001), CloseCode::Iana(3001));
        assert_eq!(CloseCode::from(4321), CloseCode::Library(4321));
        assert_eq!(CloseCode::from(999), CloseCode::Bad(999));
        assert_eq!(CloseCode::from(5000), CloseCode::Bad(5000));
    }

    #[test]
    fn test_not_allowed_on_wire() {
        assert!(!CloseCode::Status.is_allowed());
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::Tls.is_allowed());
        assert!(!CloseCode::from(2000).is_allowed());
        assert!(CloseCode::from(4000).is_allowed());
    }
}
