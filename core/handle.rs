// Copyright 2018-2025 the Deno authors. MIT license.
use crate::buffer::Buffer;
use crate::context::ScriptContext;
use crate::error::AnyError;
use crate::error::StreamError;
use crate::events::EventKind;
use crate::events::Listeners;
use crate::events::ScriptValue;
use crate::events::dispatch;
use crate::native::NativeStream;
use crate::stats::ActivityCounters;
use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::rc::Weak;

#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StreamState {
  Unbound,
  Listening,
  Connecting,
  Connected,
  ShuttingDown,
  Closed,
  Errored,
}

pub(crate) struct HandleInner<S: NativeStream> {
  context: Rc<ScriptContext>,
  pub(crate) native: RefCell<S>,
  state: Cell<StreamState>,
  reading: Cell<bool>,
  keep_alive: Cell<usize>,
  /// Held while the handle listens.
  pub(crate) listen_pin: RefCell<Option<KeepAlive<S>>>,
  /// Held from `read_start` until `read_stop` or `close`.
  pub(crate) read_pin: RefCell<Option<KeepAlive<S>>>,
  /// The buffer of the read in flight, set by `on_alloc`.
  pub(crate) read_buffer: RefCell<Option<Buffer>>,
  listeners: RefCell<Listeners>,
}

impl<S: NativeStream> Drop for HandleInner<S> {
  fn drop(&mut self) {
    ActivityCounters::dec(&self.context.counters.handles);
  }
}

/// A native stream paired with its script-visible state.
///
/// Cloning yields another reference to the same handle. The handle stays
/// alive as long as any clone, any [`KeepAlive`] guard or any pending native
/// request refers to it.
pub struct StreamHandle<S: NativeStream> {
  pub(crate) inner: Rc<HandleInner<S>>,
}

impl<S: NativeStream> Clone for StreamHandle<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<S: NativeStream> fmt::Debug for StreamHandle<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StreamHandle")
      .field("state", &self.state())
      .field("reading", &self.is_reading())
      .field("keep_alive", &self.keep_alive_count())
      .finish()
  }
}

impl<S: NativeStream> StreamHandle<S> {
  pub fn new(context: &Rc<ScriptContext>, native: S) -> Self {
    ActivityCounters::inc(&context.counters.handles);
    Self {
      inner: Rc::new(HandleInner {
        context: context.clone(),
        native: RefCell::new(native),
        state: Cell::new(StreamState::Unbound),
        reading: Cell::new(false),
        keep_alive: Cell::new(0),
        listen_pin: RefCell::new(None),
        read_pin: RefCell::new(None),
        read_buffer: RefCell::new(None),
        listeners: RefCell::new(Listeners::default()),
      }),
    }
  }

  /// The script context this handle belongs to.
  pub fn get_execution_context(&self) -> &Rc<ScriptContext> {
    &self.inner.context
  }

  /// Increments the keep-alive count. The count is decremented when the
  /// returned guard is dropped.
  pub fn keep_alive(&self) -> KeepAlive<S> {
    self.inner.keep_alive.set(self.inner.keep_alive.get() + 1);
    ActivityCounters::inc(&self.inner.context.counters.keep_alive);
    KeepAlive {
      handle: self.clone(),
    }
  }

  pub fn keep_alive_count(&self) -> usize {
    self.inner.keep_alive.get()
  }

  pub fn state(&self) -> StreamState {
    self.inner.state.get()
  }

  pub(crate) fn set_state(&self, state: StreamState) {
    let prev = self.inner.state.replace(state);
    if prev != state {
      log::trace!("stream state {prev} -> {state}");
    }
  }

  /// Whether `data` events are being delivered. Turns false once the stream
  /// ended or failed, while the keep-alive reference taken by `read_start`
  /// stays held until `read_stop` or `close`.
  pub fn is_reading(&self) -> bool {
    self.inner.reading.get()
  }

  pub(crate) fn set_reading(&self, reading: bool) {
    self.inner.reading.set(reading);
  }

  /// Adds a listener for `kind`.
  pub fn on(
    &self,
    kind: EventKind,
    listener: impl Fn(&[ScriptValue]) -> Result<(), AnyError> + 'static,
  ) {
    self.inner.listeners.borrow_mut().add(kind, Rc::new(listener));
  }

  pub fn remove_all_listeners(&self, kind: EventKind) {
    // The removed listeners may own clones of this handle.
    let removed = self.inner.listeners.borrow_mut().remove_all(kind);
    drop(removed);
  }

  pub fn listener_count(&self, kind: EventKind) -> usize {
    self.inner.listeners.borrow().count(kind)
  }

  pub(crate) fn clear_listeners(&self) {
    let removed = self.inner.listeners.borrow_mut().clear();
    drop(removed);
  }

  /// Synchronously invokes every listener of `kind` with `args`. Listeners
  /// added or removed during the dispatch take effect on the next emit.
  pub fn emit(
    &self,
    kind: EventKind,
    args: &[ScriptValue],
  ) -> Result<(), StreamError> {
    let listeners = self.inner.listeners.borrow().snapshot(kind);
    log::trace!("emit '{kind}' to {} listener(s)", listeners.len());
    dispatch(kind, &listeners, args)
  }

  pub fn downgrade(&self) -> WeakStreamHandle<S> {
    WeakStreamHandle {
      inner: Rc::downgrade(&self.inner),
    }
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.inner, &other.inner)
  }

  /// Runs `f` with the native stream, for native-specific configuration
  /// such as binding an address.
  pub fn with_native<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
    f(&mut self.inner.native.borrow_mut())
  }
}

/// A non-owning reference to a [`StreamHandle`], held by the closures given
/// to the native loop so that they never extend the handle's lifetime on
/// their own.
pub struct WeakStreamHandle<S: NativeStream> {
  inner: Weak<HandleInner<S>>,
}

impl<S: NativeStream> Clone for WeakStreamHandle<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<S: NativeStream> WeakStreamHandle<S> {
  pub fn upgrade(&self) -> Option<StreamHandle<S>> {
    self.inner.upgrade().map(|inner| StreamHandle { inner })
  }
}

/// One unit of the keep-alive count of a handle. Dropping the guard is the
/// matching unref.
#[must_use = "dropping a KeepAlive releases it immediately"]
pub struct KeepAlive<S: NativeStream> {
  handle: StreamHandle<S>,
}

impl<S: NativeStream> KeepAlive<S> {
  pub fn handle(&self) -> &StreamHandle<S> {
    &self.handle
  }

  pub fn release(self) {}
}

impl<S: NativeStream> Drop for KeepAlive<S> {
  fn drop(&mut self) {
    let inner = &self.handle.inner;
    let count = inner.keep_alive.get();
    debug_assert!(count > 0, "keep-alive count underflow");
    if count == 0 {
      log::debug!("ignoring unref of a handle with no keep-alive references");
      return;
    }
    inner.keep_alive.set(count - 1);
    ActivityCounters::dec(&inner.context.counters.keep_alive);
  }
}
