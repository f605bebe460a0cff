//! Gateway close codes.
//!
//! Codes are deliberately generic: a close never explains which check failed
//! beyond the category below.

/// Close codes sent in the websocket close frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Something went wrong on our side
    UnknownError = 4000,
    /// Opcode not valid in the current state
    UnknownOpcode = 4001,
    /// Frame could not be decoded
    DecodeError = 4002,
    /// Frame sent before Identify completed
    NotAuthenticated = 4003,
    /// Identify credential rejected
    AuthenticationFailed = 4004,
    /// Identify sent twice
    AlreadyAuthenticated = 4005,
    /// Session invalidated by the server
    SessionInvalidated = 4007,
    /// Outbound queue overflowed
    QueueOverflow = 4008,
    /// Heartbeat or identify deadline missed
    SessionTimedOut = 4009,
    /// Server asked the client to reconnect
    Reconnect = 4010,
    /// Too many concurrent sessions for this user
    SessionLimit = 4011,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            4000 => CloseCode::UnknownError,
            4001 => CloseCode::UnknownOpcode,
            4002 => CloseCode::DecodeError,
            4003 => CloseCode::NotAuthenticated,
            4004 => CloseCode::AuthenticationFailed,
            4005 => CloseCode::AlreadyAuthenticated,
            4007 => CloseCode::SessionInvalidated,
            4008 => CloseCode::QueueOverflow,
            4009 => CloseCode::SessionTimedOut,
            4010 => CloseCode::Reconnect,
            4011 => CloseCode::SessionLimit,
            _ => return None,
        })
    }

    /// Whether a client may reconnect after this close. Only a rejected
    /// credential is terminal for the attempt.
    pub fn should_reconnect(self) -> bool {
        !matches!(self, CloseCode::AuthenticationFailed)
    }

    /// Generic reason text; never carries detail.
    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::UnknownError => "unknown error",
            CloseCode::UnknownOpcode => "unknown opcode",
            CloseCode::DecodeError => "decode error",
            CloseCode::NotAuthenticated => "not authenticated",
            CloseCode::AuthenticationFailed => "authentication failed",
            CloseCode::AlreadyAuthenticated => "already authenticated",
            CloseCode::SessionInvalidated => "session invalidated",
            CloseCode::QueueOverflow => "send queue overflow",
            CloseCode::SessionTimedOut => "session timed out",
            CloseCode::Reconnect => "reconnect",
            CloseCode::SessionLimit => "session limit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(CloseCode::SessionTimedOut, true)]
    #[test_case(CloseCode::QueueOverflow, true)]
    #[test_case(CloseCode::DecodeError, true)]
    #[test_case(CloseCode::AuthenticationFailed, false)]
    fn test_should_reconnect(code: CloseCode, expected: bool) {
        assert_eq!(code.should_reconnect(), expected);
    }

    #[test]
    fn test_u16_roundtrip() {
        assert_eq!(CloseCode::from_u16(4009), Some(CloseCode::SessionTimedOut));
        assert_eq!(CloseCode::SessionTimedOut.as_u16(), 4009);
        assert_eq!(CloseCode::from_u16(1000), None);
    }
}
