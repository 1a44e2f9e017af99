// Copyright 2018-2025 the Deno authors. MIT license.

// Native completion handlers. They run from the loop with no script caller
// to return to, so failures raised by listeners or callbacks go to the
// context's uncaught error handler.

use super::Request;
use super::RequestKind;
use crate::buffer::Buffer;
use crate::error::AsyncError;
use crate::error::StreamError;
use crate::error::UV_ECANCELED;
use crate::error::UV_EOF;
use crate::events::EventKind;
use crate::events::ScriptValue;
use crate::handle::KeepAlive;
use crate::handle::StreamHandle;
use crate::handle::StreamState;
use crate::io_ctx::IoCtx;
use crate::native::NativeStream;

fn report<S: NativeStream>(
  handle: &StreamHandle<S>,
  result: Result<(), StreamError>,
) {
  if let Err(err) = result {
    handle.get_execution_context().report_uncaught(&err);
  }
}

fn error_args(error: AsyncError) -> [ScriptValue; 1] {
  [ScriptValue::Error(error)]
}

pub(super) fn on_connection<S: NativeStream>(
  handle: &StreamHandle<S>,
  status: i32,
) {
  log::trace!("on_connection status={status}");
  let result = if status < 0 {
    let error = AsyncError::new("on_connection", status);
    handle.emit(EventKind::Error, &error_args(error))
  } else {
    handle.emit(EventKind::Connection, &[])
  };
  report(handle, result);
}

pub(super) fn on_alloc<S: NativeStream>(
  handle: &StreamHandle<S>,
  suggested: usize,
) -> Buffer {
  let size = handle
    .get_execution_context()
    .options()
    .read_buffer_size
    .unwrap_or(suggested);
  let buf = Buffer::new(size);
  let mut slot = handle.inner.read_buffer.borrow_mut();
  // A read-only slot is still being dispatched further up the stack.
  if !slot.as_ref().is_some_and(Buffer::is_read_only) {
    *slot = Some(buf.clone());
  }
  buf
}

pub(super) fn on_read<S: NativeStream>(
  handle: &StreamHandle<S>,
  nread: isize,
  buf: Buffer,
) {
  log::trace!("on_read nread={nread}");
  let slot = handle.inner.read_buffer.borrow().clone();
  let locked = slot.as_ref().is_some_and(Buffer::is_read_only);

  let result = if nread >= 0 {
    if locked {
      Err(StreamError::ReadOnlyBuffer)
    } else {
      let buffer = slot.filter(|slot| slot.shares_storage(&buf)).unwrap_or(buf);
      emit_data(handle, buffer, nread as usize)
    }
  } else if nread == UV_EOF as isize {
    // The native stream stopped reading on its own. The read pin stays held
    // until `read_stop` or `close`.
    handle.set_reading(false);
    handle.emit(EventKind::End, &[])
  } else {
    handle.set_reading(false);
    handle.set_state(StreamState::Errored);
    let error = AsyncError::new("on_read", nread as i32);
    handle.emit(EventKind::Error, &error_args(error))
  };

  if !locked {
    let released = handle.inner.read_buffer.borrow_mut().take();
    drop(released);
  }
  report(handle, result);
}

/// Emits `data` with the read bytes. The buffer is read-only for the
/// duration of the dispatch.
fn emit_data<S: NativeStream>(
  handle: &StreamHandle<S>,
  buffer: Buffer,
  nread: usize,
) -> Result<(), StreamError> {
  let chunk = if nread != buffer.len() {
    buffer.slice(0, nread)?
  } else {
    buffer
  };
  chunk.set_read_only(true);
  let result = handle.emit(
    EventKind::Data,
    &[
      ScriptValue::Buffer(chunk.clone()),
      ScriptValue::Integer(nread as i64),
    ],
  );
  chunk.set_read_only(false);
  result
}

/// Shared completion of writes, shutdowns and connects.
pub(super) fn after_request<S: NativeStream>(mut req: Request<S>, status: i32) {
  let kind = req.kind;
  let handle = req.keep_alive.handle().clone();
  log::trace!("{} status={status}", kind.op_name());

  let callback = req.ctx.take_callback();
  req.ctx.release();
  let error = (status < 0).then(|| AsyncError::new(kind.op_name(), status));

  if kind == RequestKind::Connect && handle.state() == StreamState::Connecting
  {
    handle.set_state(if error.is_some() {
      StreamState::Errored
    } else {
      StreamState::Connected
    });
  }

  let had_callback = callback.is_some();
  let result = match callback {
    Some(callback) => {
      let args: Vec<ScriptValue> =
        error.iter().cloned().map(ScriptValue::Error).collect();
      callback(&args).map_err(StreamError::from)
    }
    None => Ok(()),
  };
  report(&handle, result);

  match (kind, &error) {
    (RequestKind::Connect, None) => {
      report(&handle, handle.emit(EventKind::Connect, &[]));
    }
    (RequestKind::Connect, Some(error))
      if !had_callback && status != UV_ECANCELED =>
    {
      report(&handle, handle.emit(EventKind::Error, &error_args(error.clone())));
    }
    (_, Some(error)) if !had_callback => {
      log::debug!("{error} (no callback)");
    }
    _ => {}
  }

  drop(req);
}

pub(super) fn after_close<S: NativeStream>(pin: KeepAlive<S>, mut ctx: IoCtx) {
  let handle = pin.handle().clone();
  log::trace!("after_close");
  if let Some(callback) = ctx.take_callback() {
    report(&handle, callback(&[]).map_err(StreamError::from));
  }
  report(&handle, handle.emit(EventKind::Closed, &[]));
  handle.clear_listeners();
  let released = handle.inner.read_buffer.borrow_mut().take();
  drop(released);
  drop(ctx);
  drop(pin);
}
