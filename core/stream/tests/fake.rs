// Copyright 2018-2025 the Deno authors. MIT license.

//! A deterministic in-memory [`NativeStream`]. Nothing completes on its own:
//! the test drives every completion through the [`FakeController`].

use crate::buffer::Buffer;
use crate::error::UV_EAGAIN;
use crate::error::UV_ECANCELED;
use crate::error::UV_EOF;
use crate::error::UvError;
use crate::native::AllocCb;
use crate::native::CloseCb;
use crate::native::ConnectionCb;
use crate::native::NativeStream;
use crate::native::ReadCb;
use crate::native::RequestCb;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

/// Suggested size passed to the alloc callback by [`FakeController::deliver`].
pub const SUGGESTED_SIZE: usize = 64;

#[derive(Default)]
struct FakeState {
  failures: HashMap<&'static str, i32>,
  backlog: Option<u32>,
  on_connection: Option<ConnectionCb>,
  pending_connections: usize,
  reader: Option<(AllocCb, ReadCb)>,
  writes: VecDeque<(Buffer, RequestCb)>,
  shutdown: Option<RequestCb>,
  connect: Option<(SocketAddr, RequestCb)>,
  closing: Option<(Vec<RequestCb>, CloseCb)>,
  closed: bool,
  written: Vec<u8>,
}

impl FakeState {
  fn check(&mut self, op: &'static str) -> Result<(), UvError> {
    match self.failures.remove(op) {
      Some(status) => Err(UvError::from_status(status)),
      None => Ok(()),
    }
  }
}

pub struct FakeStream {
  state: Rc<RefCell<FakeState>>,
}

impl FakeStream {
  pub fn new() -> (Self, FakeController) {
    let state = Rc::new(RefCell::new(FakeState::default()));
    (
      Self {
        state: state.clone(),
      },
      FakeController { state },
    )
  }
}

impl NativeStream for FakeStream {
  fn listen(
    &mut self,
    backlog: u32,
    on_connection: ConnectionCb,
  ) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("listen")?;
    state.backlog = Some(backlog);
    state.on_connection = Some(on_connection);
    Ok(())
  }

  fn accept(&mut self, _client: &mut Self) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("accept")?;
    if state.pending_connections == 0 {
      return Err(UvError::from_status(UV_EAGAIN));
    }
    state.pending_connections -= 1;
    Ok(())
  }

  fn read_start(&mut self, alloc: AllocCb, read: ReadCb) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("read_start")?;
    state.reader = Some((alloc, read));
    Ok(())
  }

  fn read_stop(&mut self) {
    self.state.borrow_mut().reader = None;
  }

  fn write(&mut self, data: Buffer, cb: RequestCb) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("write")?;
    state.writes.push_back((data, cb));
    Ok(())
  }

  fn shutdown(&mut self, cb: RequestCb) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("shutdown")?;
    state.shutdown = Some(cb);
    Ok(())
  }

  fn connect(&mut self, addr: SocketAddr, cb: RequestCb) -> Result<(), UvError> {
    let mut state = self.state.borrow_mut();
    state.check("connect")?;
    state.connect = Some((addr, cb));
    Ok(())
  }

  fn write_queue_size(&self) -> usize {
    self.state.borrow().writes.iter().map(|(buf, _)| buf.len()).sum()
  }

  fn close(&mut self, on_close: CloseCb) {
    let mut state = self.state.borrow_mut();
    state.reader = None;
    state.on_connection = None;
    let connect = state.connect.take().map(|(_, cb)| cb);
    let writes: Vec<_> = state.writes.drain(..).map(|(_, cb)| cb).collect();
    let shutdown = state.shutdown.take();
    let cancelled = connect.into_iter().chain(writes).chain(shutdown).collect();
    state.closing = Some((cancelled, on_close));
  }
}

/// Test-side view of a [`FakeStream`]. Every method that runs a completion
/// releases the internal borrow first, so completions may call back into the
/// stream.
#[derive(Clone)]
pub struct FakeController {
  state: Rc<RefCell<FakeState>>,
}

impl FakeController {
  /// Makes the next call of `op` fail synchronously with `status`.
  pub fn fail_next(&self, op: &'static str, status: i32) {
    self.state.borrow_mut().failures.insert(op, status);
  }

  pub fn backlog(&self) -> Option<u32> {
    self.state.borrow().backlog
  }

  pub fn is_reading(&self) -> bool {
    self.state.borrow().reader.is_some()
  }

  pub fn pending_writes(&self) -> usize {
    self.state.borrow().writes.len()
  }

  pub fn has_pending_shutdown(&self) -> bool {
    self.state.borrow().shutdown.is_some()
  }

  pub fn connect_addr(&self) -> Option<SocketAddr> {
    self.state.borrow().connect.as_ref().map(|(addr, _)| *addr)
  }

  pub fn written(&self) -> Vec<u8> {
    self.state.borrow().written.clone()
  }

  pub fn is_closed(&self) -> bool {
    self.state.borrow().closed
  }

  pub fn incoming_connection(&self) {
    let cb = {
      let mut state = self.state.borrow_mut();
      state.pending_connections += 1;
      state.on_connection.clone()
    };
    if let Some(cb) = cb {
      cb(0);
    }
  }

  pub fn connection_error(&self, status: i32) {
    let cb = self.state.borrow().on_connection.clone();
    if let Some(cb) = cb {
      cb(status);
    }
  }

  fn reader(&self) -> (AllocCb, ReadCb) {
    let state = self.state.borrow();
    let (alloc, read) = state.reader.as_ref().expect("stream is not reading");
    (alloc.clone(), read.clone())
  }

  /// Reads `data` into a buffer obtained with the default suggested size.
  /// Returns the buffer the alloc callback handed out.
  pub fn deliver(&self, data: &[u8]) -> Buffer {
    self.deliver_with_suggestion(data, SUGGESTED_SIZE)
  }

  /// Reads `data` into a buffer whose suggested size is exactly its length.
  pub fn deliver_exact(&self, data: &[u8]) -> Buffer {
    self.deliver_with_suggestion(data, data.len())
  }

  fn deliver_with_suggestion(&self, data: &[u8], suggested: usize) -> Buffer {
    let (alloc, read) = self.reader();
    let buf = alloc(suggested);
    assert!(buf.len() >= data.len(), "read buffer too small");
    buf.write_at(0, data).unwrap();
    read(data.len() as isize, buf.clone());
    buf
  }

  /// Ends the stream. Like a native stream, it stops reading first.
  pub fn deliver_eof(&self) {
    let (_, read) = self.reader();
    self.state.borrow_mut().reader = None;
    read(UV_EOF as isize, Buffer::new(0));
  }

  pub fn deliver_error(&self, status: i32) {
    let (_, read) = self.reader();
    self.state.borrow_mut().reader = None;
    read(status as isize, Buffer::new(0));
  }

  /// Completes the oldest write with `status`.
  pub fn complete_write(&self, status: i32) {
    let (data, cb) = {
      let mut state = self.state.borrow_mut();
      state.writes.pop_front().expect("no pending write")
    };
    if status == 0 {
      let bytes = data.to_vec().unwrap();
      self.state.borrow_mut().written.extend(bytes);
    }
    drop(data);
    cb(status);
  }

  pub fn complete_shutdown(&self, status: i32) {
    let cb = self.state.borrow_mut().shutdown.take();
    cb.expect("no pending shutdown")(status);
  }

  pub fn complete_connect(&self, status: i32) {
    let pending = self.state.borrow_mut().connect.take();
    let (_, cb) = pending.expect("no pending connect");
    cb(status);
  }

  /// Runs the close phase: cancelled requests first, then the close
  /// completion.
  pub fn complete_close(&self) {
    let (cancelled, on_close) = {
      let mut state = self.state.borrow_mut();
      state.closed = true;
      state.closing.take().expect("close was not called")
    };
    for cb in cancelled {
      cb(UV_ECANCELED);
    }
    on_close();
  }
}
