// Copyright 2018-2025 the Deno authors. MIT license.

//! Script-facing stream operations.
//!
//! Every asynchronous operation follows the same discipline: a [`Request`]
//! is allocated at issuance, pins the handle with a keep-alive guard and
//! carries the script callback in an [`IoCtx`]. The request is moved into
//! the native completion closure and freed exactly once, inside its
//! completion or, when the native layer rejects it, on the failing issue
//! path.

mod completions;
#[cfg(test)]
pub(crate) mod tests;

use crate::buffer::Buffer;
use crate::error::AnyError;
use crate::error::StreamError;
use crate::error::UV_EINVAL;
use crate::error::UvError;
use crate::events::EventKind;
use crate::events::ScriptValue;
use crate::handle::KeepAlive;
use crate::handle::StreamHandle;
use crate::handle::StreamState;
use crate::io_ctx::Callback;
use crate::io_ctx::IoCtx;
use crate::native::AllocCb;
use crate::native::ConnectionCb;
use crate::native::NativeStream;
use crate::native::ReadCb;
use crate::native::RequestCb;
use crate::stats::ActivityCounters;
use std::net::SocketAddr;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum RequestKind {
  Write,
  Shutdown,
  Connect,
}

impl RequestKind {
  /// Name of the operation as reported on synchronous failure.
  fn issue_name(self) -> &'static str {
    match self {
      RequestKind::Write => "write",
      RequestKind::Shutdown => "shutdown",
      RequestKind::Connect => "connect",
    }
  }

  /// Name of the completion, carried by the error value it produces.
  pub(crate) fn op_name(self) -> &'static str {
    match self {
      RequestKind::Write => "after_write",
      RequestKind::Shutdown => "after_shutdown",
      RequestKind::Connect => "after_connect",
    }
  }
}

/// A one-shot write, shutdown or connect in flight.
pub(crate) struct Request<S: NativeStream> {
  kind: RequestKind,
  ctx: IoCtx,
  keep_alive: KeepAlive<S>,
}

impl<S: NativeStream> Request<S> {
  fn new(
    handle: &StreamHandle<S>,
    kind: RequestKind,
    callback: Option<Callback>,
  ) -> Self {
    let context = handle.get_execution_context();
    ActivityCounters::inc(&context.counters.requests);
    let mut ctx = IoCtx::new(context);
    if let Some(callback) = callback {
      ctx.set_callback(callback);
    }
    Self {
      kind,
      ctx,
      keep_alive: handle.keep_alive(),
    }
  }
}

impl<S: NativeStream> Drop for Request<S> {
  fn drop(&mut self) {
    let context = self.keep_alive.handle().get_execution_context();
    ActivityCounters::dec(&context.counters.requests);
  }
}

impl<S: NativeStream> StreamHandle<S> {
  /// Starts listening for connections. `callback` is registered as a
  /// `connection` listener and `listening` is emitted before returning.
  ///
  /// On failure nothing is registered and the handle stays unbound.
  pub fn listen(
    &self,
    callback: impl Fn(&[ScriptValue]) -> Result<(), AnyError> + 'static,
    backlog: Option<u32>,
  ) -> Result<(), StreamError> {
    let state = self.state();
    if state != StreamState::Unbound {
      return Err(StreamError::InvalidState { op: "listen", state });
    }
    let backlog = backlog
      .unwrap_or(self.get_execution_context().options().default_backlog);

    let weak = self.downgrade();
    let on_connection: ConnectionCb = Rc::new(move |status| {
      if let Some(handle) = weak.upgrade() {
        completions::on_connection(&handle, status);
      }
    });
    self
      .with_native(|native| native.listen(backlog, on_connection))
      .map_err(StreamError::Listen)?;

    self.on(EventKind::Connection, callback);
    self.set_state(StreamState::Listening);
    *self.inner.listen_pin.borrow_mut() = Some(self.keep_alive());
    log::debug!("listen ok (backlog {backlog})");
    self.emit(EventKind::Listening, &[])
  }

  /// Moves one pending connection of this listening handle onto `client`.
  pub fn accept(&self, client: &Self) -> Result<(), StreamError> {
    if self.ptr_eq(client) {
      return Err(StreamError::Accept(UvError::from_status(UV_EINVAL)));
    }
    let state = client.state();
    if state != StreamState::Unbound {
      return Err(StreamError::InvalidState { op: "accept", state });
    }
    {
      let mut server = self.inner.native.borrow_mut();
      let mut native = client.inner.native.borrow_mut();
      server.accept(&mut native).map_err(StreamError::Accept)?;
    }
    client.set_state(StreamState::Connected);
    Ok(())
  }

  /// Starts delivering `data`, `end` and `error` events. The handle is kept
  /// alive until `read_stop` or `close`.
  pub fn read_start(&self) -> Result<(), StreamError> {
    if self.is_reading() {
      return Err(StreamError::AlreadyReading);
    }
    self.require_connected("read_start", true)?;

    let weak = self.downgrade();
    let alloc: AllocCb = Rc::new(move |suggested| match weak.upgrade() {
      Some(handle) => completions::on_alloc(&handle, suggested),
      None => Buffer::new(suggested),
    });
    let weak = self.downgrade();
    let read: ReadCb = Rc::new(move |nread, buf| {
      if let Some(handle) = weak.upgrade() {
        completions::on_read(&handle, nread, buf);
      }
    });
    self
      .with_native(|native| native.read_start(alloc, read))
      .map_err(StreamError::ReadStart)?;

    self.set_reading(true);
    let mut pin = self.inner.read_pin.borrow_mut();
    if pin.is_none() {
      *pin = Some(self.keep_alive());
    }
    Ok(())
  }

  /// Stops reading and releases the keep-alive reference taken by
  /// `read_start`.
  pub fn read_stop(&self) {
    self.read_stop_noref();
    let pin = self.inner.read_pin.borrow_mut().take();
    drop(pin);
  }

  /// Stops reading without touching the keep-alive count. The reference
  /// taken by `read_start` stays held until `read_stop` or `close`.
  pub fn read_stop_noref(&self) {
    if self.is_reading() {
      self.with_native(|native| native.read_stop());
      self.set_reading(false);
    }
  }

  /// Writes `buffer` without copying it. The buffer is kept alive until the
  /// write completes; `callback` then receives an error value on failure
  /// and nothing on success.
  pub fn write(
    &self,
    buffer: Buffer,
    callback: Option<Callback>,
  ) -> Result<(), StreamError> {
    self.require_connected("write", false)?;
    let mut req = Request::new(self, RequestKind::Write, callback);
    req.ctx.set_data(buffer.clone());
    self.issue(req, move |native, cb| native.write(buffer, cb))
  }

  /// Half-closes the write side once queued writes are flushed.
  pub fn shutdown(&self, callback: Option<Callback>) -> Result<(), StreamError> {
    self.require_connected("shutdown", false)?;
    let req = Request::new(self, RequestKind::Shutdown, callback);
    self.issue(req, |native, cb| native.shutdown(cb))?;
    self.set_state(StreamState::ShuttingDown);
    Ok(())
  }

  /// Connects to `addr`. On success the handle becomes connected, then
  /// `callback` runs and `connect` is emitted. On failure `callback`
  /// receives the error value; without a callback `error` is emitted.
  pub fn connect(
    &self,
    addr: SocketAddr,
    callback: Option<Callback>,
  ) -> Result<(), StreamError> {
    let state = self.state();
    if state != StreamState::Unbound {
      return Err(StreamError::InvalidState { op: "connect", state });
    }
    let req = Request::new(self, RequestKind::Connect, callback);
    self.issue(req, move |native, cb| native.connect(addr, cb))?;
    self.set_state(StreamState::Connecting);
    Ok(())
  }

  /// Bytes written but not yet flushed to the operating system.
  pub fn write_queue_size(&self) -> usize {
    self.inner.native.borrow().write_queue_size()
  }

  /// Stops reading, drops the listen and read keep-alive references and
  /// closes the native stream. Pending requests complete with a cancellation
  /// error first; then `callback` runs, `closed` is emitted and every
  /// listener is removed.
  pub fn close(&self, callback: Option<Callback>) -> Result<(), StreamError> {
    let state = self.state();
    if state == StreamState::Closed {
      return Err(StreamError::InvalidState { op: "close", state });
    }
    self.read_stop_noref();
    self.set_state(StreamState::Closed);

    let mut ctx = IoCtx::new(self.get_execution_context());
    if let Some(callback) = callback {
      ctx.set_callback(callback);
    }
    let pin = self.keep_alive();
    self.with_native(|native| {
      native.close(Box::new(move || completions::after_close(pin, ctx)))
    });

    let listen_pin = self.inner.listen_pin.borrow_mut().take();
    let read_pin = self.inner.read_pin.borrow_mut().take();
    drop((listen_pin, read_pin));
    log::debug!("close issued (was {state})");
    Ok(())
  }

  fn require_connected(
    &self,
    op: &'static str,
    allow_shutting_down: bool,
  ) -> Result<(), StreamError> {
    match self.state() {
      StreamState::Connected => Ok(()),
      StreamState::ShuttingDown if allow_shutting_down => Ok(()),
      state @ (StreamState::Unbound
      | StreamState::Listening
      | StreamState::Connecting) => {
        Err(StreamError::NotConnected { op, state })
      }
      state => Err(StreamError::InvalidState { op, state }),
    }
  }

  /// Hands `req` to the native layer. When the native layer rejects it, the
  /// completion closure is dropped unrun and the request is freed with it.
  fn issue(
    &self,
    req: Request<S>,
    submit: impl FnOnce(&mut S, RequestCb) -> Result<(), UvError>,
  ) -> Result<(), StreamError> {
    let op = req.kind.issue_name();
    let cb: RequestCb =
      Box::new(move |status| completions::after_request(req, status));
    self
      .with_native(|native| submit(native, cb))
      .map_err(|error| StreamError::Issue { op, error })
  }
}
