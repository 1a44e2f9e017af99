// Copyright 2018-2025 the Deno authors. MIT license.
use crate::context::ScriptContext;
use crate::error::AnyError;
use crate::events::ScriptValue;
use crate::ref_table::RefId;
use crate::stats::ActivityCounters;
use std::any::Any;
use std::rc::Rc;

/// A one-shot script callback, invoked with an error value on failure or
/// with no arguments on success.
pub type Callback = Box<dyn FnOnce(&[ScriptValue]) -> Result<(), AnyError>>;

/// Carries a script callback and at most one registered data value from the
/// moment an operation is issued to its completion.
///
/// The data value is pinned in the context's reference table so it outlives
/// any script-side reference for as long as the native side may use it.
pub struct IoCtx {
  context: Rc<ScriptContext>,
  callback: Option<Callback>,
  data: Option<RefId>,
}

impl IoCtx {
  pub fn new(context: &Rc<ScriptContext>) -> Self {
    ActivityCounters::inc(&context.counters.io_contexts);
    Self {
      context: context.clone(),
      callback: None,
      data: None,
    }
  }

  pub fn set_callback(&mut self, callback: Callback) {
    self.callback = Some(callback);
  }

  /// Registers `value` as this context's data, replacing (and releasing)
  /// any previous one.
  pub fn set_data<T: Any>(&mut self, value: T) -> RefId {
    if let Some(prev) = self.data.take() {
      self.context.release(prev);
    }
    let id = self.context.register(value);
    self.data = Some(id);
    id
  }

  pub fn data<T: Any>(&self) -> Option<Rc<T>> {
    self.data.and_then(|id| self.context.lookup(id).ok())
  }

  pub fn take_callback(&mut self) -> Option<Callback> {
    self.callback.take()
  }

  /// Releases the registered data value. Calling it again does nothing.
  pub fn release(&mut self) {
    if let Some(id) = self.data.take() {
      self.context.release(id);
    }
  }
}

impl Drop for IoCtx {
  fn drop(&mut self) {
    self.release();
    ActivityCounters::dec(&self.context.counters.io_contexts);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::ContextOptions;

  #[test]
  fn data_is_pinned_until_release() {
    let ctx = ScriptContext::new(ContextOptions::default());
    let mut io = IoCtx::new(&ctx);
    assert_eq!(ctx.stats().io_contexts, 1);

    io.set_data(String::from("payload"));
    assert_eq!(ctx.stats().refs, 1);
    assert_eq!(*io.data::<String>().unwrap(), "payload");

    io.set_data(5u8);
    assert_eq!(ctx.stats().refs, 1);
    assert!(io.data::<String>().is_none());

    io.release();
    io.release();
    assert_eq!(ctx.stats().refs, 0);
    drop(io);
    assert!(ctx.stats().is_idle());
  }

  #[test]
  fn drop_releases_data() {
    let ctx = ScriptContext::new(ContextOptions::default());
    let mut io = IoCtx::new(&ctx);
    io.set_data(1u32);
    io.set_callback(Box::new(|_: &[ScriptValue]| Ok(())));
    assert!(io.take_callback().is_some());
    assert!(io.take_callback().is_none());
    drop(io);
    assert_eq!(ctx.stats().refs, 0);
    assert_eq!(ctx.stats().io_contexts, 0);
  }
}
