use libc::{
    F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK, c_int, fcntl, nfds_t, pollfd,
};
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Reads from a file descriptor into the given buffer.
///
/// Returns the number of bytes read. The file descriptor **must** be
/// non-blocking, an empty channel surfaces as [`io::ErrorKind::WouldBlock`].
pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Writes the buffer to a file descriptor.
///
/// Returns the number of bytes written. The file descriptor **must** be
/// non-blocking, a full channel surfaces as [`io::ErrorKind::WouldBlock`].
pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buffer.as_ptr() as *const _, buffer.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Sets a file descriptor to non-blocking mode.
pub(crate) fn sys_set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Marks a file descriptor close-on-exec.
pub(crate) fn sys_set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Creates a pipe with both ends non-blocking and close-on-exec.
///
/// Returns `(read_end, write_end)`. Both ends are owned, so a failure
/// half-way through releases whatever was already created.
pub(crate) fn sys_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];

    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: both descriptors were just returned by pipe(2) and are owned
    // by nobody else.
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

    for fd in fds {
        sys_set_nonblocking(fd)?;
        sys_set_cloexec(fd)?;
    }

    Ok((reader, writer))
}

/// Waits for readiness on `len` entries starting at `fds`.
///
/// A negative `timeout_ms` blocks indefinitely. Interrupted calls are
/// reported as [`io::ErrorKind::Interrupted`] so the caller can recompute
/// its timeout before retrying.
///
/// # Safety
///
/// `fds` must point to `len` initialized `pollfd` entries that stay valid,
/// and are not written by anyone else, until the call returns.
pub(crate) unsafe fn sys_poll_raw(
    fds: *mut pollfd,
    len: usize,
    timeout_ms: c_int,
) -> io::Result<usize> {
    let rc = unsafe { libc::poll(fds, len as nfds_t, timeout_ms) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Waits for readiness on a borrowed set of descriptors.
pub(crate) fn sys_poll(fds: &mut [pollfd], timeout_ms: c_int) -> io::Result<usize> {
    // SAFETY: the slice is exclusively borrowed for the duration of the call.
    unsafe { sys_poll_raw(fds.as_mut_ptr(), fds.len(), timeout_ms) }
}
