// Copyright 2018-2025 the Deno authors. MIT license.
use super::Calls;
use super::callback;
use super::context;
use super::context_with;
use super::record;
use crate::AnyError;
use crate::Buffer;
use crate::ContextOptions;
use crate::RunMode;
use crate::StreamError;
use crate::StreamHandle;
use crate::StreamState;
use crate::UvLoop;
use crate::UvTcp;
use crate::events::EventKind;
use crate::events::ScriptValue;
use crate::stats::ActivitySnapshot;
use pretty_assertions::assert_eq;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;

fn localhost() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Writes every chunk back and closes once the peer finished sending.
fn echo(client: &StreamHandle<UvTcp>) -> Result<(), StreamError> {
  let weak = client.downgrade();
  client.on(EventKind::Data, move |args| {
    let (Some(client), Some(chunk)) = (weak.upgrade(), args[0].as_buffer())
    else {
      return Ok(());
    };
    client.write(chunk.clone(), None)?;
    Ok(())
  });

  let weak = client.downgrade();
  client.on(EventKind::End, move |_| {
    let Some(client) = weak.upgrade() else {
      return Ok(());
    };
    let weak = client.downgrade();
    client.shutdown(Some(Box::new(
      move |_: &[ScriptValue]| -> Result<(), AnyError> {
        if let Some(client) = weak.upgrade() {
          client.close(None)?;
        }
        Ok(())
      },
    )))?;
    Ok(())
  });

  client.read_start()
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_through_handles() {
  let (ctx, uncaught) = context();
  let uv_loop = UvLoop::new();
  let server = StreamHandle::new(&ctx, UvTcp::new(&uv_loop));
  server.with_native(|tcp| tcp.bind(localhost())).unwrap();

  let on_connection = {
    let weak = server.downgrade();
    let ctx = ctx.clone();
    let uv_loop = uv_loop.clone();
    move |_: &[ScriptValue]| -> Result<(), AnyError> {
      let Some(server) = weak.upgrade() else {
        return Ok(());
      };
      let client = StreamHandle::new(&ctx, UvTcp::new(&uv_loop));
      server.accept(&client)?;
      echo(&client)?;
      let uv_loop = uv_loop.clone();
      client.on(EventKind::Closed, move |_| {
        uv_loop.stop();
        Ok(())
      });
      Ok(())
    }
  };
  server.listen(on_connection, None).unwrap();
  assert_eq!(server.state(), StreamState::Listening);
  assert_eq!(server.keep_alive_count(), 1);

  let addr = server.with_native(|tcp| tcp.local_addr()).unwrap();
  let peer = std::thread::spawn(move || {
    let mut stream = std::net::TcpStream::connect(addr).unwrap();
    stream.write_all(b"hello").unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let mut echoed = vec![];
    stream.read_to_end(&mut echoed).unwrap();
    echoed
  });

  uv_loop.run(RunMode::Default);
  assert_eq!(peer.join().unwrap(), b"hello");
  assert!(uncaught.borrow().is_empty(), "{:?}", uncaught.borrow());

  // The accepted handle is gone; only the listener remains.
  assert_eq!(
    ctx.stats(),
    ActivitySnapshot {
      handles: 1,
      keep_alive: 1,
      ..Default::default()
    }
  );

  server.close(None).unwrap();
  assert!(!uv_loop.run(RunMode::Default));
  assert_eq!(server.state(), StreamState::Closed);
  assert_eq!(server.keep_alive_count(), 0);
  assert_eq!(
    ctx.stats(),
    ActivitySnapshot {
      handles: 1,
      ..Default::default()
    }
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_write_then_close() {
  let listener = std::net::TcpListener::bind(localhost()).unwrap();
  let addr = listener.local_addr().unwrap();
  let peer = std::thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    let mut received = vec![];
    stream.read_to_end(&mut received).unwrap();
    received
  });

  let (ctx, uncaught) = context();
  let uv_loop = UvLoop::new();
  let handle = StreamHandle::new(&ctx, UvTcp::new(&uv_loop));
  let connects = record(&handle, EventKind::Connect);
  let closed = record(&handle, EventKind::Closed);
  let written = Calls::default();

  let weak = handle.downgrade();
  let on_write = written.clone();
  let on_connect = move |args: &[ScriptValue]| -> Result<(), AnyError> {
    assert!(args.is_empty());
    let Some(handle) = weak.upgrade() else {
      return Ok(());
    };
    assert_eq!(handle.state(), StreamState::Connected);
    handle.write(Buffer::from("over the loop"), Some(callback(&on_write)))?;
    let weak = handle.downgrade();
    handle.shutdown(Some(Box::new(
      move |args: &[ScriptValue]| -> Result<(), AnyError> {
        assert!(args.is_empty());
        if let Some(handle) = weak.upgrade() {
          handle.close(None)?;
        }
        Ok(())
      },
    )))?;
    Ok(())
  };
  handle.connect(addr, Some(Box::new(on_connect))).unwrap();
  assert_eq!(handle.state(), StreamState::Connecting);
  assert_eq!(handle.keep_alive_count(), 1);

  assert!(!uv_loop.run(RunMode::Default));
  assert_eq!(peer.join().unwrap(), b"over the loop");
  assert_eq!(connects.borrow().len(), 1);
  assert_eq!(closed.borrow().len(), 1);
  assert_eq!(written.borrow().len(), 1);
  assert!(written.borrow()[0].is_empty());
  assert_eq!(handle.state(), StreamState::Closed);
  assert!(ctx.stats().is_idle());
  assert!(uncaught.borrow().is_empty(), "{:?}", uncaught.borrow());
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_refused_reports_error_event() {
  // Reserve a port, then free it so nothing listens there.
  let addr = std::net::TcpListener::bind(localhost())
    .unwrap()
    .local_addr()
    .unwrap();

  let (ctx, uncaught) = context();
  let uv_loop = UvLoop::new();
  let handle = StreamHandle::new(&ctx, UvTcp::new(&uv_loop));
  let errors = record(&handle, EventKind::Error);
  handle.connect(addr, None).unwrap();

  assert!(!uv_loop.run(RunMode::Default));
  let errors = errors.borrow();
  assert_eq!(errors.len(), 1);
  let error = errors[0][0].as_error().unwrap();
  assert_eq!(error.op(), "after_connect");
  assert_eq!(error.name(), "ECONNREFUSED");
  assert_eq!(handle.state(), StreamState::Errored);
  assert_eq!(handle.keep_alive_count(), 0);
  assert!(uncaught.borrow().is_empty());
  assert!(ctx.stats().is_idle());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_sized_read_buffer_reports_error() {
  let listener = std::net::TcpListener::bind(localhost()).unwrap();
  let addr = listener.local_addr().unwrap();
  let peer = std::thread::spawn(move || {
    let (mut stream, _) = listener.accept().unwrap();
    stream.write_all(b"hello").unwrap();
    let mut rest = vec![];
    stream.read_to_end(&mut rest).unwrap();
  });

  let (ctx, uncaught) = context_with(ContextOptions {
    read_buffer_size: Some(0),
    ..Default::default()
  });
  let uv_loop = UvLoop::new();
  let handle = StreamHandle::new(&ctx, UvTcp::new(&uv_loop));
  let data = record(&handle, EventKind::Data);
  let errors = record(&handle, EventKind::Error);

  let weak = handle.downgrade();
  let on_connect = move |_: &[ScriptValue]| -> Result<(), AnyError> {
    if let Some(handle) = weak.upgrade() {
      handle.read_start()?;
    }
    Ok(())
  };
  handle.connect(addr, Some(Box::new(on_connect))).unwrap();

  // Reading stops, so the loop runs out of work instead of spinning.
  assert!(!uv_loop.run(RunMode::Default));
  assert!(data.borrow().is_empty());
  {
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    let error = errors[0][0].as_error().unwrap();
    assert_eq!(error.op(), "on_read");
    assert_eq!(error.name(), "ENOBUFS");
  }
  assert_eq!(handle.state(), StreamState::Errored);
  assert!(!handle.is_reading());
  assert!(uncaught.borrow().is_empty(), "{:?}", uncaught.borrow());

  handle.close(None).unwrap();
  assert!(!uv_loop.run(RunMode::Default));
  assert_eq!(handle.keep_alive_count(), 0);
  assert!(ctx.stats().is_idle());
  peer.join().unwrap();
}
