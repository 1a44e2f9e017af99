// Copyright 2018-2025 the Deno authors. MIT license.
use crate::error::StreamError;
use crate::ref_table::RefId;
use crate::ref_table::RefTable;
use crate::stats::ActivityCounters;
use crate::stats::ActivitySnapshot;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

pub const DEFAULT_BACKLOG: u32 = 128;

/// Receives failures raised by listeners and callbacks while a completion is
/// being delivered. Those failures have no caller to return to.
pub type UncaughtErrorHandler = Rc<dyn Fn(&StreamError)>;

pub struct ContextOptions {
  /// Backlog passed to the native listen call when `listen` is not given one.
  pub default_backlog: u32,

  /// Size of the buffer allocated for each read. `None` uses the size the
  /// native loop suggests.
  pub read_buffer_size: Option<usize>,

  /// Called with failures raised from inside completion handlers. When not
  /// set, they are logged.
  pub uncaught_error_handler: Option<UncaughtErrorHandler>,
}

impl Default for ContextOptions {
  fn default() -> Self {
    Self {
      default_backlog: DEFAULT_BACKLOG,
      read_buffer_size: None,
      uncaught_error_handler: None,
    }
  }
}

/// The script execution context that stream handles belong to. It owns the
/// reference table used to keep script values alive across native calls and
/// the activity counters.
pub struct ScriptContext {
  options: ContextOptions,
  refs: RefCell<RefTable>,
  pub(crate) counters: ActivityCounters,
}

impl ScriptContext {
  pub fn new(options: ContextOptions) -> Rc<Self> {
    Rc::new(Self {
      options,
      refs: RefCell::new(RefTable::default()),
      counters: ActivityCounters::default(),
    })
  }

  pub fn options(&self) -> &ContextOptions {
    &self.options
  }

  pub fn register<T: Any>(&self, value: T) -> RefId {
    self.refs.borrow_mut().register(value)
  }

  pub fn lookup<T: Any>(&self, id: RefId) -> Result<Rc<T>, StreamError> {
    self.refs.borrow().lookup(id)
  }

  pub fn release(&self, id: RefId) -> bool {
    // Bind the removed value so it is dropped after the borrow ends.
    let removed = self.refs.borrow_mut().release(id);
    removed.is_some()
  }

  pub fn report_uncaught(&self, err: &StreamError) {
    match &self.options.uncaught_error_handler {
      Some(handler) => handler(err),
      None => log::error!("Uncaught error in stream completion: {err}"),
    }
  }

  pub fn stats(&self) -> ActivitySnapshot {
    ActivitySnapshot {
      handles: self.counters.handles.get(),
      keep_alive: self.counters.keep_alive.get(),
      requests: self.counters.requests.get(),
      io_contexts: self.counters.io_contexts.get(),
      refs: self.refs.borrow().len(),
    }
  }
}
