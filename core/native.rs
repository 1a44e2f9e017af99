// Copyright 2018-2025 the Deno authors. MIT license.

//! The boundary between stream handles and the native event loop.
//!
//! Every operation that completes asynchronously takes its completion as a
//! closure. Implementations must uphold two rules:
//!
//! - A completion is never invoked from inside the call that issued it. It
//!   runs from a later loop phase.
//! - When an operation returns `Err`, its completion is dropped without being
//!   invoked.

use crate::buffer::Buffer;
use crate::error::UvError;
use std::net::SocketAddr;
use std::rc::Rc;

/// Invoked once per incoming connection with a status (`0` on success).
pub type ConnectionCb = Rc<dyn Fn(i32)>;
/// Asked for a buffer of roughly the suggested size before each read.
pub type AllocCb = Rc<dyn Fn(usize) -> Buffer>;
/// Invoked with the byte count (or a negative status) and the buffer that
/// was handed out by the matching [`AllocCb`] call.
pub type ReadCb = Rc<dyn Fn(isize, Buffer)>;
/// Completion of a one-shot write, shutdown or connect request.
pub type RequestCb = Box<dyn FnOnce(i32)>;
pub type CloseCb = Box<dyn FnOnce()>;

pub trait NativeStream: 'static {
  /// Starts accepting connections, queueing at most `backlog` of them.
  fn listen(
    &mut self,
    backlog: u32,
    on_connection: ConnectionCb,
  ) -> Result<(), UvError>;

  /// Moves one pending connection onto `client`.
  fn accept(&mut self, client: &mut Self) -> Result<(), UvError>;

  fn read_start(&mut self, alloc: AllocCb, read: ReadCb)
  -> Result<(), UvError>;

  fn read_stop(&mut self);

  /// Queues `data` for writing. The native side keeps the view alive until
  /// the completion runs.
  fn write(&mut self, data: Buffer, cb: RequestCb) -> Result<(), UvError>;

  /// Half-closes the write side once every queued write has been flushed.
  fn shutdown(&mut self, cb: RequestCb) -> Result<(), UvError>;

  fn connect(&mut self, addr: SocketAddr, cb: RequestCb)
  -> Result<(), UvError>;

  /// Bytes queued but not yet handed to the operating system.
  fn write_queue_size(&self) -> usize;

  /// Releases the native resources. Pending requests complete with
  /// `UV_ECANCELED` before `on_close` runs.
  fn close(&mut self, on_close: CloseCb);
}
