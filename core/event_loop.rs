// Copyright 2018-2025 the Deno authors. MIT license.

//! Phase-based event loop matching libuv's architecture.
//!
//! Each iteration of the event loop runs these phases **in order**:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │     pending callbacks         │  ← Request completions deferred from the issuing call
//! ├───────────────────────────────┤
//! │          poll                 │  ← Poll sockets: connect, accept, read, flush writes
//! ├───────────────────────────────┤
//! │      close callbacks          │  ← Cancelled requests, then close completions
//! └───────────────────────────────┘
//! ```
//!
//! Completions are never run from inside the call that issued them: a write
//! that finishes immediately still reports from the next pending phase.

/// How long [`crate::UvLoop::run`] keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
  /// Run until there are no active handles or requests left, or until
  /// [`crate::UvLoop::stop`] is called.
  #[default]
  Default,
  /// Run a single iteration, sleeping briefly first if there is nothing to
  /// do yet.
  Once,
  /// Run a single iteration without sleeping.
  NoWait,
}

/// Phase identifiers for the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLoopPhase {
  /// Completions deferred from the previous iteration.
  PendingCallbacks,
  /// Poll the async reactor for I/O readiness.
  Poll,
  /// Close callbacks (resource cleanup).
  CloseCallbacks,
}

impl EventLoopPhase {
  /// Returns all phases in execution order.
  pub const fn all() -> &'static [EventLoopPhase] {
    &[
      EventLoopPhase::PendingCallbacks,
      EventLoopPhase::Poll,
      EventLoopPhase::CloseCallbacks,
    ]
  }
}

/// Completion deferred to the pending phase.
pub(crate) struct PendingCallback {
  pub callback: Box<dyn FnOnce()>,
}

impl PendingCallback {
  pub fn new(callback: impl FnOnce() + 'static) -> Self {
    Self {
      callback: Box::new(callback),
    }
  }
}

/// Close callback for resource cleanup.
pub(crate) struct CloseCallback {
  pub callback: Box<dyn FnOnce()>,
}

impl CloseCallback {
  pub fn new(callback: impl FnOnce() + 'static) -> Self {
    Self {
      callback: Box::new(callback),
    }
  }
}
