//! Listening socket lifecycle on raw `libc` calls.
//!
//! `std::net::TcpListener::bind` hides which step failed. The agent reports
//! the exact stage and errno on its debug endpoint, so the socket is created,
//! bound and put into listening state one call at a time.

use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use dca_common::Error;
use tracing::{info, warn};

use super::{ServerStage, ServerStatus};
use crate::logging::event_names;

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn fail(status: &ServerStatus, stage: ServerStage, call: &'static str) -> Error {
    fail_errno(status, stage, call, last_errno())
}

fn fail_errno(status: &ServerStatus, stage: ServerStage, call: &'static str, errno: i32) -> Error {
    status.set_stage(stage);
    status.record_errno(errno);
    warn!(target: event_names::HTTP_SOCKET_FAILED, call, errno, stage = stage.code(), "listen socket setup failed");
    Error::Socket { stage: call, errno }
}

/// A listener that cannot be made non-blocking never reaches `Serving`.
fn nonblocking_failed(status: &ServerStatus, err: &io::Error) -> Error {
    fail_errno(status, ServerStage::ListenFailed, "fcntl", err.raw_os_error().unwrap_or(0))
}

fn sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is plain old data; all-zero is a valid value.
    let mut sa: libc::sockaddr_in = unsafe { mem::zeroed() };
    sa.sin_family = libc::AF_INET as libc::sa_family_t;
    sa.sin_port = addr.port().to_be();
    sa.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        sa.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }
    sa
}

/// Create, bind and listen, walking `status.stage` through 1..=4.
///
/// On success the listener is non-blocking and `listening` is set. On failure
/// the matching negative stage and errno are recorded.
pub(crate) fn open_listener(
    status: &ServerStatus,
    addr: SocketAddrV4,
    backlog: i32,
) -> Result<TcpListener, Error> {
    status.set_stage(ServerStage::CreatingSocket);
    // SAFETY: plain syscall; the result is checked before use.
    let raw = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(fail(status, ServerStage::SocketCreateFailed, "socket"));
    }
    // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let one: libc::c_int = 1;
    // SAFETY: option value points to a live c_int of the advertised size.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        warn!(errno = last_errno(), "SO_REUSEADDR not applied");
    }

    status.set_stage(ServerStage::Binding);
    let sa = sockaddr_in(addr);
    // SAFETY: `sa` is a valid sockaddr_in and the length matches it.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &sa as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(fail(status, ServerStage::BindFailed, "bind"));
    }

    status.set_stage(ServerStage::Listening);
    // SAFETY: plain syscall on a descriptor we own.
    if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
        return Err(fail(status, ServerStage::ListenFailed, "listen"));
    }

    let listener = TcpListener::from(fd);
    if let Err(e) = listener.set_nonblocking(true) {
        return Err(nonblocking_failed(status, &e));
    }
    let port = match listener.local_addr() {
        Ok(SocketAddr::V4(local)) => local.port(),
        _ => addr.port(),
    };

    status.set_listen_fd(listener.as_raw_fd());
    status.set_port(port);
    status.set_listening(true);
    status.set_stage(ServerStage::Serving);
    info!(target: event_names::HTTP_LISTENING, bind = %addr.ip(), port, "http: listening");
    Ok(listener)
}

/// Wait up to `timeout_ms` for `fd` to become readable.
///
/// `Ok(false)` is a timeout. Hang-up and error conditions count as readable
/// so the caller's next accept observes them.
pub(crate) fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    // SAFETY: one valid pollfd, count matches.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc > 0 && pfd.revents != 0)
}

/// Shut down both directions of `fd` so a blocked wait on it returns.
pub(crate) fn shutdown_fd(fd: RawFd) {
    if fd < 0 {
        return;
    }
    // SAFETY: shutdown on a stale descriptor fails with EBADF/ENOTSOCK and
    // has no other effect.
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}
