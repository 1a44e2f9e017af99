// Copyright 2018-2025 the Deno authors. MIT license.

use crate::buffer::BufferError;
use crate::handle::StreamState;
use crate::ref_table::RefId;
use std::fmt;

/// A generic wrapper for failures raised by script callbacks and listeners.
pub type AnyError = anyhow::Error;

// libuv-compatible error codes (negative errno values on unix,
// which vary depending on platform, fixed values on windows).
macro_rules! uv_errno {
  ($name:ident, $unix:expr, $win:expr) => {
    #[cfg(unix)]
    pub const $name: i32 = -($unix);
    #[cfg(windows)]
    pub const $name: i32 = $win;
  };
}

uv_errno!(UV_EPERM, libc::EPERM, -4048);
uv_errno!(UV_EIO, libc::EIO, -4070);
uv_errno!(UV_EAGAIN, libc::EAGAIN, -4088);
uv_errno!(UV_EBADF, libc::EBADF, -4083);
uv_errno!(UV_EADDRINUSE, libc::EADDRINUSE, -4091);
uv_errno!(UV_EADDRNOTAVAIL, libc::EADDRNOTAVAIL, -4090);
uv_errno!(UV_ECONNREFUSED, libc::ECONNREFUSED, -4078);
uv_errno!(UV_ECONNRESET, libc::ECONNRESET, -4077);
uv_errno!(UV_ECONNABORTED, libc::ECONNABORTED, -4079);
uv_errno!(UV_EINVAL, libc::EINVAL, -4071);
uv_errno!(UV_EISCONN, libc::EISCONN, -4056);
uv_errno!(UV_ENOTCONN, libc::ENOTCONN, -4053);
uv_errno!(UV_ECANCELED, libc::ECANCELED, -4081);
uv_errno!(UV_ENOBUFS, libc::ENOBUFS, -4060);
uv_errno!(UV_EPIPE, libc::EPIPE, -4047);
uv_errno!(UV_ETIMEDOUT, libc::ETIMEDOUT, -4039);
pub const UV_EOF: i32 = -4095;

/// A native status code as reported by the loop, always negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UvError(i32);

impl UvError {
  pub const fn from_status(status: i32) -> Self {
    Self(status)
  }

  pub const fn code(self) -> i32 {
    self.0
  }

  pub fn is_eof(self) -> bool {
    self.0 == UV_EOF
  }

  /// The symbolic name of the error, as `uv_err_name` would return it.
  pub fn name(self) -> &'static str {
    match self.0 {
      UV_EOF => "EOF",
      UV_EPERM => "EPERM",
      UV_EIO => "EIO",
      UV_EAGAIN => "EAGAIN",
      UV_EBADF => "EBADF",
      UV_EADDRINUSE => "EADDRINUSE",
      UV_EADDRNOTAVAIL => "EADDRNOTAVAIL",
      UV_ECONNREFUSED => "ECONNREFUSED",
      UV_ECONNRESET => "ECONNRESET",
      UV_ECONNABORTED => "ECONNABORTED",
      UV_EINVAL => "EINVAL",
      UV_EISCONN => "EISCONN",
      UV_ENOTCONN => "ENOTCONN",
      UV_ECANCELED => "ECANCELED",
      UV_ENOBUFS => "ENOBUFS",
      UV_EPIPE => "EPIPE",
      UV_ETIMEDOUT => "ETIMEDOUT",
      _ => "UNKNOWN",
    }
  }

  pub fn description(self) -> String {
    if self.is_eof() {
      return "end of file".to_string();
    }
    os_description(self.0)
  }

  pub(crate) fn last_os_error() -> Self {
    Self::from(&std::io::Error::last_os_error())
  }
}

#[cfg(unix)]
fn os_description(code: i32) -> String {
  std::io::Error::from_raw_os_error(-code).to_string()
}

#[cfg(not(unix))]
fn os_description(code: i32) -> String {
  format!("error code {code}")
}

impl From<&std::io::Error> for UvError {
  fn from(err: &std::io::Error) -> Self {
    #[cfg(unix)]
    if let Some(errno) = err.raw_os_error() {
      return Self(-errno);
    }
    use std::io::ErrorKind;
    Self(match err.kind() {
      ErrorKind::UnexpectedEof => UV_EOF,
      ErrorKind::ConnectionRefused => UV_ECONNREFUSED,
      ErrorKind::ConnectionReset => UV_ECONNRESET,
      ErrorKind::ConnectionAborted => UV_ECONNABORTED,
      ErrorKind::NotConnected => UV_ENOTCONN,
      ErrorKind::AddrInUse => UV_EADDRINUSE,
      ErrorKind::AddrNotAvailable => UV_EADDRNOTAVAIL,
      ErrorKind::BrokenPipe => UV_EPIPE,
      ErrorKind::WouldBlock => UV_EAGAIN,
      ErrorKind::InvalidInput => UV_EINVAL,
      ErrorKind::TimedOut => UV_ETIMEDOUT,
      ErrorKind::PermissionDenied => UV_EPERM,
      _ => UV_EIO,
    })
  }
}

impl fmt::Display for UvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}, {}", self.name(), self.description())
  }
}

impl std::error::Error for UvError {}

/// The error value handed to script code when an asynchronous operation
/// fails: the failing operation (`after_write`, `on_read`, ...) and the
/// native status it failed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncError {
  op: &'static str,
  error: UvError,
}

impl AsyncError {
  pub fn new(op: &'static str, status: i32) -> Self {
    Self {
      op,
      error: UvError::from_status(status),
    }
  }

  pub fn op(&self) -> &'static str {
    self.op
  }

  pub fn code(&self) -> i32 {
    self.error.code()
  }

  pub fn name(&self) -> &'static str {
    self.error.name()
  }
}

impl fmt::Display for AsyncError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.op, self.error)
  }
}

impl std::error::Error for AsyncError {}

/// Failures raised synchronously to the caller of a stream operation, and
/// failures surfaced to the uncaught error handler from completions.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
  #[error("listen: {0}")]
  Listen(#[source] UvError),
  #[error("accept: {0}")]
  Accept(#[source] UvError),
  #[error("read_start: {0}")]
  ReadStart(#[source] UvError),
  #[error("{op}: {error}")]
  Issue {
    op: &'static str,
    #[source]
    error: UvError,
  },
  #[error("{op}: stream is {state}, not connected")]
  NotConnected {
    op: &'static str,
    state: StreamState,
  },
  #[error("{op}: not allowed while the stream is {state}")]
  InvalidState {
    op: &'static str,
    state: StreamState,
  },
  #[error("read_start: stream is already reading")]
  AlreadyReading,
  #[error(
    "incoming data would be written into a read-only buffer; was the event loop re-entered from a data listener?"
  )]
  ReadOnlyBuffer,
  #[error("unhandled 'error' event: {0}")]
  UnhandledError(String),
  #[error("bad reference id: {0}")]
  BadRefId(RefId),
  #[error(transparent)]
  Buffer(#[from] BufferError),
  #[error(transparent)]
  Callback(#[from] AnyError),
}
