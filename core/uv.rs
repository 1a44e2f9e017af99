// Copyright 2018-2025 the Deno authors. MIT license.

// A libuv-shaped event loop and TCP stream on top of tokio.
//
// Sockets are driven by direct polling through tokio's
// `poll_accept`/`try_read`/`try_write`: no spawned tasks and no channels. The
// loop must be run from a thread that has entered a tokio runtime with I/O
// enabled.

use crate::buffer::Buffer;
use crate::error::UV_EAGAIN;
use crate::error::UV_EBADF;
use crate::error::UV_ECANCELED;
use crate::error::UV_EINVAL;
use crate::error::UV_EISCONN;
use crate::error::UV_ENOBUFS;
use crate::error::UV_ENOTCONN;
use crate::error::UV_EOF;
use crate::error::UV_EPIPE;
use crate::error::UvError;
use crate::event_loop::CloseCallback;
use crate::event_loop::EventLoopPhase;
use crate::event_loop::PendingCallback;
use crate::event_loop::RunMode;
use crate::native::AllocCb;
use crate::native::CloseCb;
use crate::native::ConnectionCb;
use crate::native::NativeStream;
use crate::native::ReadCb;
use crate::native::RequestCb;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::rc::Weak;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Size suggested to the alloc callback before each read.
const SUGGESTED_READ_SIZE: usize = 65536;

/// I/O is re-polled up to this many times per tick, so that work produced by
/// callbacks (a write issued from a read callback, say) is batched into the
/// same iteration.
const IO_PASSES: usize = 16;

#[derive(Clone, Default)]
pub struct UvLoop {
  inner: Rc<UvLoopInner>,
}

#[derive(Default)]
struct UvLoopInner {
  tcp_handles: RefCell<Vec<Weak<RefCell<TcpState>>>>,
  pending: RefCell<VecDeque<PendingCallback>>,
  closing: RefCell<VecDeque<CloseCallback>>,
  waker: RefCell<Option<Waker>>,
  stop_flag: Cell<bool>,
}

impl UvLoop {
  pub fn new() -> Self {
    Self::default()
  }

  /// Runs the loop according to `mode`. Returns whether there is still
  /// work that would keep the loop alive.
  pub fn run(&self, mode: RunMode) -> bool {
    let inner = &self.inner;
    inner.stop_flag.set(false);
    match mode {
      RunMode::Default => {
        while inner.has_alive_handles() && !inner.stop_flag.get() {
          inner.wait();
          inner.tick();
        }
      }
      RunMode::Once => {
        inner.wait();
        inner.tick();
      }
      RunMode::NoWait => {
        inner.tick();
      }
    }
    inner.has_alive_handles()
  }

  /// Runs one iteration from an async task. Resolves once nothing keeps the
  /// loop alive or [`UvLoop::stop`] was called; otherwise the socket
  /// readiness registered during the iteration wakes the task.
  pub fn poll_run(&self, cx: &mut Context<'_>) -> Poll<()> {
    let inner = &self.inner;
    inner.set_waker(cx.waker());
    let did_work = inner.tick();
    if inner.stop_flag.replace(false) || !inner.has_alive_handles() {
      return Poll::Ready(());
    }
    if did_work || inner.has_queued_callbacks() {
      cx.waker().wake_by_ref();
    }
    Poll::Pending
  }

  pub async fn run_async(&self) {
    futures::future::poll_fn(|cx| self.poll_run(cx)).await
  }

  /// Makes the current `run` return after the iteration in progress.
  pub fn stop(&self) {
    self.inner.stop_flag.set(true);
    self.inner.wake();
  }

  pub fn has_alive_handles(&self) -> bool {
    self.inner.has_alive_handles()
  }

  fn defer_close(&self, callback: impl FnOnce() + 'static) {
    self
      .inner
      .closing
      .borrow_mut()
      .push_back(CloseCallback::new(callback));
    self.inner.wake();
  }
}

impl UvLoopInner {
  fn set_waker(&self, waker: &Waker) {
    let mut slot = self.waker.borrow_mut();
    match slot.as_ref() {
      Some(existing) if existing.will_wake(waker) => {}
      _ => *slot = Some(waker.clone()),
    }
  }

  fn defer(&self, callback: impl FnOnce() + 'static) {
    self
      .pending
      .borrow_mut()
      .push_back(PendingCallback::new(callback));
    self.wake();
  }

  fn wake(&self) {
    if let Some(waker) = self.waker.borrow().as_ref() {
      waker.wake_by_ref();
    }
  }

  fn has_queued_callbacks(&self) -> bool {
    !self.pending.borrow().is_empty() || !self.closing.borrow().is_empty()
  }

  fn has_alive_handles(&self) -> bool {
    if self.has_queued_callbacks() {
      return true;
    }
    self
      .tcp_handles
      .borrow()
      .iter()
      .filter_map(Weak::upgrade)
      .any(|state| state.borrow().is_active())
  }

  /// Sleeps briefly when there is nothing to run right away, giving the
  /// reactor a chance to deliver readiness.
  fn wait(&self) {
    if !self.has_queued_callbacks() {
      std::thread::sleep(Duration::from_millis(1));
    }
  }

  fn tick(&self) -> bool {
    let mut did_work = false;
    for phase in EventLoopPhase::all() {
      did_work |= match phase {
        EventLoopPhase::PendingCallbacks => self.run_pending(),
        EventLoopPhase::Poll => self.run_io(),
        EventLoopPhase::CloseCallbacks => self.run_close(),
      };
    }
    did_work
  }

  /// Runs the completions queued before this phase started. Completions
  /// queued while it runs wait for the next iteration.
  fn run_pending(&self) -> bool {
    let snapshot: Vec<_> = self.pending.borrow_mut().drain(..).collect();
    let did_work = !snapshot.is_empty();
    for pending in snapshot {
      (pending.callback)();
    }
    did_work
  }

  /// Completions already queued for the pending phase are delivered before
  /// any cancellation or close callback.
  fn run_close(&self) -> bool {
    let mut did_work = false;
    while !self.closing.borrow().is_empty() {
      self.run_pending();
      let snapshot: Vec<_> = self.closing.borrow_mut().drain(..).collect();
      for close in snapshot {
        (close.callback)();
      }
      did_work = true;
    }
    did_work
  }

  fn run_io(&self) -> bool {
    let waker = self
      .waker
      .borrow()
      .clone()
      .unwrap_or_else(|| Waker::noop().clone());
    let mut cx = Context::from_waker(&waker);

    let mut did_any_work = false;
    for _pass in 0..IO_PASSES {
      let mut any_work = false;
      let mut i = 0;
      loop {
        let state = {
          let handles = self.tcp_handles.borrow();
          if i >= handles.len() {
            break;
          }
          handles[i].upgrade()
        };
        i += 1;
        let Some(state) = state else {
          continue;
        };
        if state.borrow().closing {
          continue;
        }
        any_work |= poll_connect(&state, &mut cx);
        any_work |= poll_listener(&state, &mut cx);
        any_work |= poll_read(&state, &mut cx);
        any_work |= poll_write(self, &state, &mut cx);
        any_work |= poll_shutdown(self, &state, &mut cx);
      }
      if !any_work {
        break;
      }
      did_any_work = true;
    }
    did_any_work
  }
}

struct ConnectPending {
  future: Pin<Box<dyn Future<Output = std::io::Result<tokio::net::TcpStream>>>>,
  cb: RequestCb,
}

/// Queued write waiting for the socket to become writable. `data` aliases
/// the caller's buffer.
struct WritePending {
  data: Buffer,
  offset: usize,
  cb: RequestCb,
}

#[derive(Default)]
struct TcpState {
  bind_addr: Option<SocketAddr>,
  stream: Option<tokio::net::TcpStream>,
  listener: Option<tokio::net::TcpListener>,
  listener_addr: Option<SocketAddr>,
  nodelay: bool,
  alloc_cb: Option<AllocCb>,
  read_cb: Option<ReadCb>,
  reading: bool,
  connect: Option<ConnectPending>,
  write_queue: VecDeque<WritePending>,
  shutdown: Option<RequestCb>,
  connection_cb: Option<ConnectionCb>,
  backlog: VecDeque<tokio::net::TcpStream>,
  max_backlog: usize,
  closing: bool,
}

impl TcpState {
  fn is_active(&self) -> bool {
    !self.closing
      && (self.connection_cb.is_some()
        || self.reading
        || self.connect.is_some()
        || !self.write_queue.is_empty()
        || self.shutdown.is_some())
  }

  fn set_stream(&mut self, stream: tokio::net::TcpStream) {
    if self.nodelay {
      stream.set_nodelay(true).ok();
    }
    self.stream = Some(stream);
  }
}

fn poll_connect(state: &Rc<RefCell<TcpState>>, cx: &mut Context<'_>) -> bool {
  let (cb, status) = {
    let mut tcp = state.borrow_mut();
    let Some(pending) = tcp.connect.as_mut() else {
      return false;
    };
    let Poll::Ready(result) = pending.future.as_mut().poll(cx) else {
      return false;
    };
    let Some(pending) = tcp.connect.take() else {
      return false;
    };
    let status = match result {
      Ok(stream) => {
        tcp.set_stream(stream);
        0
      }
      Err(err) => UvError::from(&err).code(),
    };
    (pending.cb, status)
  };
  log::trace!("connect completed with status {status}");
  cb(status);
  true
}

fn poll_listener(state: &Rc<RefCell<TcpState>>, cx: &mut Context<'_>) -> bool {
  let mut any_work = false;
  let mut accept_error = None;
  let cb = {
    let mut tcp = state.borrow_mut();
    let tcp = &mut *tcp;
    let (Some(listener), Some(cb)) =
      (tcp.listener.as_ref(), tcp.connection_cb.clone())
    else {
      return false;
    };
    while tcp.backlog.len() < tcp.max_backlog {
      match listener.poll_accept(cx) {
        Poll::Ready(Ok((stream, _))) => {
          tcp.backlog.push_back(stream);
          any_work = true;
        }
        Poll::Ready(Err(err)) => {
          accept_error = Some(UvError::from(&err).code());
          break;
        }
        Poll::Pending => break,
      }
    }
    cb
  };
  if let Some(status) = accept_error {
    cb(status);
    any_work = true;
  }
  loop {
    let queued = state.borrow().backlog.len();
    if queued == 0 {
      break;
    }
    cb(0);
    // Connections the callback did not accept stay queued for the next
    // iteration.
    if state.borrow().backlog.len() >= queued {
      break;
    }
  }
  any_work
}

fn poll_read(state: &Rc<RefCell<TcpState>>, cx: &mut Context<'_>) -> bool {
  let mut any_work = false;
  {
    let tcp = state.borrow();
    match tcp.stream.as_ref() {
      Some(stream) if tcp.reading => {
        // Register interest so the reactor wakes us.
        let _ = stream.poll_read_ready(cx);
      }
      _ => return false,
    }
  }
  loop {
    // Re-check after each callback: it may have stopped reading or closed.
    let (alloc_cb, read_cb) = {
      let tcp = state.borrow();
      match (&tcp.alloc_cb, &tcp.read_cb) {
        (Some(alloc), Some(read)) if tcp.reading && tcp.stream.is_some() => {
          (alloc.clone(), read.clone())
        }
        _ => break,
      }
    };
    let buf = alloc_cb(SUGGESTED_READ_SIZE);
    if buf.is_empty() {
      // Nothing can be read into an empty buffer; reading stops here.
      state.borrow_mut().reading = false;
      read_cb(UV_ENOBUFS as isize, buf);
      any_work = true;
      break;
    }
    let result = {
      let tcp = state.borrow();
      let Some(stream) = tcp.stream.as_ref() else {
        break;
      };
      buf.with_bytes_mut(|bytes| stream.try_read(bytes))
    };
    let result = match result {
      Ok(result) => result,
      Err(err) => {
        log::debug!("read buffer unavailable: {err}");
        break;
      }
    };
    match result {
      Ok(0) => {
        state.borrow_mut().reading = false;
        read_cb(UV_EOF as isize, buf);
        break;
      }
      Ok(n) => {
        any_work = true;
        read_cb(n as isize, buf);
      }
      Err(err) if err.kind() == ErrorKind::WouldBlock => {
        if let Some(stream) = state.borrow().stream.as_ref() {
          let _ = stream.poll_read_ready(cx);
        }
        break;
      }
      Err(err) => {
        state.borrow_mut().reading = false;
        read_cb(UvError::from(&err).code() as isize, buf);
        break;
      }
    }
  }
  any_work
}

/// Write and shutdown completions go through the pending queue, so they are
/// delivered in issue order no matter which phase finished them.
fn poll_write(
  inner: &UvLoopInner,
  state: &Rc<RefCell<TcpState>>,
  cx: &mut Context<'_>,
) -> bool {
  let mut any_work = false;
  loop {
    let done = {
      let mut tcp = state.borrow_mut();
      let tcp = &mut *tcp;
      let (Some(stream), Some(pw)) =
        (tcp.stream.as_ref(), tcp.write_queue.front_mut())
      else {
        break;
      };
      match flush(stream, pw) {
        Poll::Ready(status) => {
          let pw = tcp.write_queue.pop_front();
          pw.map(|pw| (pw.cb, status))
        }
        Poll::Pending => {
          if stream.poll_write_ready(cx).is_ready() {
            // Writable, yet nothing went out: the buffer was borrowed.
            cx.waker().wake_by_ref();
          }
          None
        }
      }
    };
    match done {
      Some((cb, status)) => {
        any_work = true;
        inner.defer(move || cb(status));
      }
      None => break,
    }
  }
  any_work
}

/// Writes as much of `pw` as the socket takes. Ready with a status once the
/// write finished or failed.
fn flush(stream: &tokio::net::TcpStream, pw: &mut WritePending) -> Poll<i32> {
  while pw.offset < pw.data.len() {
    let offset = pw.offset;
    let Ok(result) =
      pw.data.with_bytes(|bytes| stream.try_write(&bytes[offset..]))
    else {
      // The buffer is being mutated by script code; retry later.
      return Poll::Pending;
    };
    match result {
      Ok(n) => pw.offset += n,
      Err(err) if err.kind() == ErrorKind::WouldBlock => return Poll::Pending,
      Err(err) => return Poll::Ready(UvError::from(&err).code()),
    }
  }
  Poll::Ready(0)
}

fn poll_shutdown(
  inner: &UvLoopInner,
  state: &Rc<RefCell<TcpState>>,
  cx: &mut Context<'_>,
) -> bool {
  let (cb, status) = {
    let mut tcp = state.borrow_mut();
    if tcp.shutdown.is_none() || !tcp.write_queue.is_empty() {
      return false;
    }
    let status = match tcp.stream.as_mut() {
      Some(stream) => match Pin::new(stream).poll_shutdown(cx) {
        Poll::Ready(Ok(())) => 0,
        Poll::Ready(Err(err)) => UvError::from(&err).code(),
        Poll::Pending => return false,
      },
      None => UV_ENOTCONN,
    };
    let Some(cb) = tcp.shutdown.take() else {
      return false;
    };
    (cb, status)
  };
  log::trace!("shutdown completed with status {status}");
  inner.defer(move || cb(status));
  true
}

/// A TCP socket driven by a [`UvLoop`].
pub struct UvTcp {
  loop_: UvLoop,
  state: Rc<RefCell<TcpState>>,
}

impl UvTcp {
  pub fn new(loop_: &UvLoop) -> Self {
    let state = Rc::new(RefCell::new(TcpState::default()));
    loop_
      .inner
      .tcp_handles
      .borrow_mut()
      .push(Rc::downgrade(&state));
    Self {
      loop_: loop_.clone(),
      state,
    }
  }

  /// Sets the address `listen` binds to. Defaults to `0.0.0.0:0`.
  pub fn bind(&mut self, addr: SocketAddr) -> Result<(), UvError> {
    let mut tcp = self.state.borrow_mut();
    if tcp.listener.is_some() || tcp.stream.is_some() {
      return Err(UvError::from_status(UV_EINVAL));
    }
    tcp.bind_addr = Some(addr);
    Ok(())
  }

  pub fn nodelay(&mut self, enable: bool) -> Result<(), UvError> {
    let mut tcp = self.state.borrow_mut();
    tcp.nodelay = enable;
    if let Some(stream) = tcp.stream.as_ref() {
      stream.set_nodelay(enable).map_err(|err| UvError::from(&err))?;
    }
    Ok(())
  }

  pub fn is_nodelay(&self) -> bool {
    self.state.borrow().nodelay
  }

  pub fn local_addr(&self) -> Result<SocketAddr, UvError> {
    let tcp = self.state.borrow();
    if let Some(addr) = tcp.listener_addr {
      return Ok(addr);
    }
    match tcp.stream.as_ref() {
      Some(stream) => stream.local_addr().map_err(|err| UvError::from(&err)),
      None => Err(UvError::from_status(UV_EBADF)),
    }
  }

  pub fn peer_addr(&self) -> Result<SocketAddr, UvError> {
    match self.state.borrow().stream.as_ref() {
      Some(stream) => stream.peer_addr().map_err(|err| UvError::from(&err)),
      None => Err(UvError::from_status(UV_ENOTCONN)),
    }
  }

  fn check_open(&self) -> Result<(), UvError> {
    if self.state.borrow().closing {
      return Err(UvError::from_status(UV_EBADF));
    }
    Ok(())
  }

  fn check_connected(&self) -> Result<(), UvError> {
    self.check_open()?;
    if self.state.borrow().stream.is_none() {
      return Err(UvError::from_status(UV_ENOTCONN));
    }
    Ok(())
  }
}

impl Drop for UvTcp {
  fn drop(&mut self) {
    let me = Rc::downgrade(&self.state);
    self
      .loop_
      .inner
      .tcp_handles
      .borrow_mut()
      .retain(|h| h.strong_count() > 0 && !Weak::ptr_eq(h, &me));
  }
}

/// Tokio panics when sockets are registered outside of a runtime.
fn ensure_runtime() -> Result<(), UvError> {
  tokio::runtime::Handle::try_current()
    .map(|_| ())
    .map_err(|_| UvError::from_status(UV_EINVAL))
}

#[cfg(unix)]
fn set_backlog(
  listener: &std::net::TcpListener,
  backlog: u32,
) -> Result<(), UvError> {
  use std::os::fd::AsRawFd;
  let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
  // SAFETY: the descriptor is owned by `listener` and stays open for the
  // duration of the call. Listening again only updates the queue length.
  if unsafe { libc::listen(listener.as_raw_fd(), backlog) } != 0 {
    return Err(UvError::last_os_error());
  }
  Ok(())
}

#[cfg(not(unix))]
fn set_backlog(
  _listener: &std::net::TcpListener,
  _backlog: u32,
) -> Result<(), UvError> {
  Ok(())
}

impl NativeStream for UvTcp {
  fn listen(
    &mut self,
    backlog: u32,
    on_connection: ConnectionCb,
  ) -> Result<(), UvError> {
    self.check_open()?;
    ensure_runtime()?;
    let bind_addr = {
      let tcp = self.state.borrow();
      if tcp.listener.is_some() || tcp.stream.is_some() {
        return Err(UvError::from_status(UV_EINVAL));
      }
      tcp
        .bind_addr
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    };

    let std_listener = std::net::TcpListener::bind(bind_addr)
      .map_err(|err| UvError::from(&err))?;
    set_backlog(&std_listener, backlog)?;
    std_listener
      .set_nonblocking(true)
      .map_err(|err| UvError::from(&err))?;
    let listener_addr = std_listener.local_addr().ok();
    let listener = tokio::net::TcpListener::from_std(std_listener)
      .map_err(|err| UvError::from(&err))?;

    let mut tcp = self.state.borrow_mut();
    tcp.listener = Some(listener);
    tcp.listener_addr = listener_addr;
    tcp.max_backlog = usize::try_from(backlog).unwrap_or(usize::MAX).max(1);
    tcp.connection_cb = Some(on_connection);
    drop(tcp);
    log::debug!("listening on {listener_addr:?} (backlog {backlog})");
    self.loop_.inner.wake();
    Ok(())
  }

  fn accept(&mut self, client: &mut Self) -> Result<(), UvError> {
    self.check_open()?;
    client.check_open()?;
    if client.state.borrow().stream.is_some() {
      return Err(UvError::from_status(UV_EISCONN));
    }
    let stream = self
      .state
      .borrow_mut()
      .backlog
      .pop_front()
      .ok_or(UvError::from_status(UV_EAGAIN))?;
    client.state.borrow_mut().set_stream(stream);
    Ok(())
  }

  fn read_start(&mut self, alloc: AllocCb, read: ReadCb) -> Result<(), UvError> {
    self.check_connected()?;
    let mut tcp = self.state.borrow_mut();
    tcp.alloc_cb = Some(alloc);
    tcp.read_cb = Some(read);
    tcp.reading = true;
    drop(tcp);
    self.loop_.inner.wake();
    Ok(())
  }

  fn read_stop(&mut self) {
    let mut tcp = self.state.borrow_mut();
    tcp.reading = false;
    tcp.alloc_cb = None;
    tcp.read_cb = None;
  }

  fn write(&mut self, data: Buffer, cb: RequestCb) -> Result<(), UvError> {
    self.check_connected()?;
    let mut tcp = self.state.borrow_mut();
    if tcp.shutdown.is_some() {
      return Err(UvError::from_status(UV_EPIPE));
    }
    let mut pw = WritePending {
      data,
      offset: 0,
      cb,
    };
    if tcp.write_queue.is_empty()
      && let Some(stream) = tcp.stream.as_ref()
      && let Poll::Ready(status) = flush(stream, &mut pw)
    {
      drop(tcp);
      let cb = pw.cb;
      self.loop_.inner.defer(move || cb(status));
      return Ok(());
    }
    tcp.write_queue.push_back(pw);
    drop(tcp);
    self.loop_.inner.wake();
    Ok(())
  }

  fn shutdown(&mut self, cb: RequestCb) -> Result<(), UvError> {
    self.check_connected()?;
    let mut tcp = self.state.borrow_mut();
    if tcp.shutdown.is_some() {
      return Err(UvError::from_status(UV_EINVAL));
    }
    tcp.shutdown = Some(cb);
    drop(tcp);
    self.loop_.inner.wake();
    Ok(())
  }

  fn connect(&mut self, addr: SocketAddr, cb: RequestCb) -> Result<(), UvError> {
    self.check_open()?;
    ensure_runtime()?;
    let mut tcp = self.state.borrow_mut();
    if tcp.stream.is_some() {
      return Err(UvError::from_status(UV_EISCONN));
    }
    if tcp.connect.is_some() || tcp.listener.is_some() {
      return Err(UvError::from_status(UV_EINVAL));
    }
    tcp.connect = Some(ConnectPending {
      future: Box::pin(tokio::net::TcpStream::connect(addr)),
      cb,
    });
    drop(tcp);
    self.loop_.inner.wake();
    Ok(())
  }

  fn write_queue_size(&self) -> usize {
    self
      .state
      .borrow()
      .write_queue
      .iter()
      .map(|pw| pw.data.len() - pw.offset)
      .sum()
  }

  fn close(&mut self, on_close: CloseCb) {
    let cancelled: Vec<RequestCb> = {
      let mut tcp = self.state.borrow_mut();
      tcp.closing = true;
      tcp.reading = false;
      tcp.alloc_cb = None;
      tcp.read_cb = None;
      tcp.connection_cb = None;
      tcp.listener = None;
      tcp.backlog.clear();
      tcp.stream = None;
      let connect = tcp.connect.take().map(|pending| pending.cb);
      let writes: Vec<_> = tcp.write_queue.drain(..).map(|pw| pw.cb).collect();
      let shutdown = tcp.shutdown.take();
      connect.into_iter().chain(writes).chain(shutdown).collect()
    };
    log::debug!("closing tcp handle, {} request(s) cancelled", cancelled.len());
    for cb in cancelled {
      self.loop_.defer_close(move || cb(UV_ECANCELED));
    }
    self.loop_.defer_close(on_close);
  }
}
