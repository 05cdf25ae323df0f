//! Error kinds returned by every framebuffer subsystem operation.
//!
//! These map 1:1 onto the reply codes carried back over the IPC channel
//! (see `to_reply_code`/`from_reply_code` below); they are never raw
//! `xous::Error` values because
//! the session FSM must distinguish "bad argument" from "no such viewport"
//! from "table full" at the protocol level, not just "some syscall failed".

use core::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, num_derive::FromPrimitive, num_derive::ToPrimitive)]
pub enum FbError {
    /// Argument out of range, geometry does not fit, wrong-sized buffer,
    /// no shared area set when required.
    InvalidArgs,
    /// Referenced viewport/pixmap/animation slot is unused (or a stale
    /// generation).
    NotFound,
    /// Table full, or a second concurrent connection was attempted.
    LimitExceeded,
    /// PREPARE-SHM while another token is already pending.
    Busy,
    /// Allocation failure (back buffer, pixmap pixels, scratch line).
    OutOfMemory,
    /// Connection attempt denied.
    Refused,
    /// Unknown IPC method.
    Unsupported,
}

impl fmt::Display for FbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FbError::InvalidArgs => "invalid arguments",
            FbError::NotFound => "no such resource",
            FbError::LimitExceeded => "resource table full",
            FbError::Busy => "shared area token already pending",
            FbError::OutOfMemory => "allocation failure",
            FbError::Refused => "connection refused",
            FbError::Unsupported => "unsupported method",
        };
        f.write_str(s)
    }
}

#[cfg(not(target_os = "none"))]
impl std::error::Error for FbError {}

pub type FbResult<T> = Result<T, FbError>;

/// 0 is reserved for success; every error is `variant index + 1` so the
/// IPC reply scalar can carry either directly.
impl FbError {
    pub fn to_reply_code(self) -> usize {
        use num_traits::ToPrimitive;
        self.to_usize().unwrap() + 1
    }

    pub fn from_reply_code(code: usize) -> Option<FbError> {
        use num_traits::FromPrimitive;
        if code == 0 { None } else { FbError::from_usize(code - 1) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_code_round_trips() {
        let all = [
            FbError::InvalidArgs,
            FbError::NotFound,
            FbError::LimitExceeded,
            FbError::Busy,
            FbError::OutOfMemory,
            FbError::Refused,
            FbError::Unsupported,
        ];
        for e in all {
            let code = e.to_reply_code();
            assert_ne!(code, 0);
            assert_eq!(FbError::from_reply_code(code), Some(e));
        }
    }

    #[test]
    fn zero_is_not_an_error() { assert_eq!(FbError::from_reply_code(0), None); }
}
