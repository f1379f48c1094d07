use crate::CoreError;
use pkgcompat_runtime::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code carried in the `result` field of a reply frame.
///
/// `0` is success, a positive value is the foreign binary's exit status, and a
/// negative value names a daemon-side failure class. [`raw`](Self::raw) always
/// returns the integer exactly as it was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum StatusCode {
    Ok,
    ForeignExit(i32),
    InvalidPayload,
    UnsupportedDistro,
    StagingFailed,
    RootCorrupted,
    LaunchFailed,
    ReplyOverflow,
    Internal,
    Unknown(i32),
}

impl StatusCode {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Ok,
            n if n > 0 => Self::ForeignExit(n),
            -1 => Self::InvalidPayload,
            -2 => Self::UnsupportedDistro,
            -3 => Self::StagingFailed,
            -4 => Self::RootCorrupted,
            -5 => Self::LaunchFailed,
            -6 => Self::ReplyOverflow,
            -7 => Self::Internal,
            n => Self::Unknown(n),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ForeignExit(n) | Self::Unknown(n) => n,
            Self::InvalidPayload => -1,
            Self::UnsupportedDistro => -2,
            Self::StagingFailed => -3,
            Self::RootCorrupted => -4,
            Self::LaunchFailed => -5,
            Self::ReplyOverflow => -6,
            Self::Internal => -7,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Ok
    }
}

impl From<i32> for StatusCode {
    fn from(raw: i32) -> Self {
        Self::from_raw(raw)
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.raw()
    }
}

impl From<&CoreError> for StatusCode {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::Schema(_) | CoreError::Wire(_) => Self::InvalidPayload,
            CoreError::UnsupportedDistro(_) => Self::UnsupportedDistro,
            CoreError::ForeignBinaryFailed(n) if *n > 0 => Self::ForeignExit(*n),
            CoreError::Runtime(RuntimeError::StagingFailed(_)) => Self::StagingFailed,
            CoreError::Runtime(RuntimeError::RootCorrupted(_)) => Self::RootCorrupted,
            CoreError::Runtime(
                RuntimeError::LaunchFailed(_) | RuntimeError::LauncherUnavailable(_),
            ) => Self::LaunchFailed,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::ForeignExit(n) => write!(f, "foreign binary exited with status {n}"),
            Self::InvalidPayload => write!(f, "invalid payload (-1)"),
            Self::UnsupportedDistro => write!(f, "unsupported distro (-2)"),
            Self::StagingFailed => write!(f, "staging failed (-3)"),
            Self::RootCorrupted => write!(f, "isolation root corrupted (-4)"),
            Self::LaunchFailed => write!(f, "launch failed (-5)"),
            Self::ReplyOverflow => write!(f, "reply overflow (-6)"),
            Self::Internal => write!(f, "internal daemon error (-7)"),
            Self::Unknown(n) => write!(f, "unknown status {n}"),
        }
    }
}
