//! Error taxonomy.
//!
//! Only loop setup and descriptor probing can fail with an error value.
//! Once a loop exists, a failure of the wake signal, the timer or the
//! readiness primitive is unrecoverable and terminates the process through
//! [`fatal`].

use std::io;
use std::os::fd::RawFd;

/// Portable error kinds, independent of the platform status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Access,
    AddrInUse,
    BadFd,
    Busy,
    Canceled,
    ConnAborted,
    ConnRefused,
    Exists,
    Fault,
    HostUnreach,
    Invalid,
    Io,
    Loop,
    TooManyFiles,
    MsgSize,
    NoBufs,
    NoDevice,
    NotFound,
    OutOfMemory,
    NoSpace,
    NotSupported,
    NotEmpty,
    NotTty,
    Eof,
    Permission,
    BrokenPipe,
    Protocol,
    ReadOnlyFs,
    TimedOut,
    Unknown,
}

impl ErrorKind {
    /// Translates a platform status code into its portable kind.
    ///
    /// This is a pure lookup; unknown codes map to [`ErrorKind::Unknown`].
    pub fn from_raw_os_error(code: i32) -> Self {
        match code {
            libc::EACCES => ErrorKind::Access,
            libc::EADDRINUSE => ErrorKind::AddrInUse,
            libc::EBADF => ErrorKind::BadFd,
            libc::EBUSY => ErrorKind::Busy,
            libc::ECANCELED => ErrorKind::Canceled,
            libc::ECONNABORTED => ErrorKind::ConnAborted,
            libc::ECONNREFUSED => ErrorKind::ConnRefused,
            libc::EEXIST => ErrorKind::Exists,
            libc::EFAULT => ErrorKind::Fault,
            libc::EHOSTUNREACH => ErrorKind::HostUnreach,
            libc::EINVAL => ErrorKind::Invalid,
            libc::EIO => ErrorKind::Io,
            libc::ELOOP => ErrorKind::Loop,
            libc::EMFILE | libc::ENFILE => ErrorKind::TooManyFiles,
            libc::EMSGSIZE => ErrorKind::MsgSize,
            libc::ENOBUFS => ErrorKind::NoBufs,
            libc::ENODEV => ErrorKind::NoDevice,
            libc::ENOENT => ErrorKind::NotFound,
            libc::ENOMEM => ErrorKind::OutOfMemory,
            libc::ENOSPC => ErrorKind::NoSpace,
            libc::ENOSYS => ErrorKind::NotSupported,
            libc::ENOTEMPTY => ErrorKind::NotEmpty,
            libc::ENOTTY => ErrorKind::NotTty,
            libc::EPERM => ErrorKind::Permission,
            libc::EPIPE => ErrorKind::BrokenPipe,
            libc::EPROTO => ErrorKind::Protocol,
            libc::EROFS => ErrorKind::ReadOnlyFs,
            libc::ETIMEDOUT => ErrorKind::TimedOut,
            _ => ErrorKind::Unknown,
        }
    }
}

/// Errors surfaced by loop setup and descriptor probing.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// A synchronization primitive could not be reserved while building
    /// the loop. Everything reserved before the failure has been released.
    #[error("could not reserve the {resource}")]
    ResourceExhausted {
        resource: &'static str,
        #[source]
        source: io::Error,
    },

    /// The descriptor is not usable with `poll(2)`.
    #[error("descriptor {0} is not supported by poll")]
    InvalidFd(RawFd),

    /// A probe syscall failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoopError {
    /// Returns the portable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoopError::ResourceExhausted { .. } => ErrorKind::OutOfMemory,
            LoopError::InvalidFd(_) => ErrorKind::Invalid,
            LoopError::Io(error) => error
                .raw_os_error()
                .map(ErrorKind::from_raw_os_error)
                .unwrap_or(ErrorKind::Unknown),
        }
    }
}

/// Terminates the process after a steady-state primitive failure.
///
/// The wake signal, the timer and the readiness call are assumed to work
/// once the loop has been built; there is no degraded mode.
pub(crate) fn fatal(operation: &'static str, error: io::Error) -> ! {
    tracing::error!(message = "flagpoll: unrecoverable platform failure", operation, %error);
    std::process::abort()
}
