// Copyright 2018-2025 the Deno authors. MIT license.
use crate::ContextOptions;
use crate::ScriptContext;
use crate::StreamHandle;
use crate::events::EventKind;
use crate::events::ScriptValue;
use crate::io_ctx::Callback;
use crate::native::NativeStream;
use std::cell::RefCell;
use std::rc::Rc;

pub(crate) mod fake;
mod tcp;

/// Arguments of every recorded call, in order.
pub(crate) type Calls = Rc<RefCell<Vec<Vec<ScriptValue>>>>;

/// A context whose uncaught errors are collected as strings.
pub(crate) fn context() -> (Rc<ScriptContext>, Rc<RefCell<Vec<String>>>) {
  context_with(ContextOptions::default())
}

pub(crate) fn context_with(
  options: ContextOptions,
) -> (Rc<ScriptContext>, Rc<RefCell<Vec<String>>>) {
  let uncaught = Rc::new(RefCell::new(vec![]));
  let sink = uncaught.clone();
  let ctx = ScriptContext::new(ContextOptions {
    uncaught_error_handler: Some(Rc::new(move |err: &crate::StreamError| {
      sink.borrow_mut().push(err.to_string());
    })),
    ..options
  });
  (ctx, uncaught)
}

pub(crate) fn record<S: NativeStream>(
  handle: &StreamHandle<S>,
  kind: EventKind,
) -> Calls {
  let calls = Calls::default();
  let sink = calls.clone();
  handle.on(kind, move |args| {
    sink.borrow_mut().push(args.to_vec());
    Ok(())
  });
  calls
}

pub(crate) fn callback(calls: &Calls) -> Callback {
  let sink = calls.clone();
  Box::new(move |args: &[ScriptValue]| {
    sink.borrow_mut().push(args.to_vec());
    Ok(())
  })
}
