// Copyright 2018-2025 the Deno authors. MIT license.
use serde::Serialize;
use std::cell::Cell;

/// Live counters maintained by the stream layer. Each counter is bumped when
/// the tracked object is created and dropped back when it is destroyed, so a
/// quiescent context reads all zeroes.
#[derive(Default)]
pub(crate) struct ActivityCounters {
  pub handles: Cell<usize>,
  pub keep_alive: Cell<usize>,
  pub requests: Cell<usize>,
  pub io_contexts: Cell<usize>,
}

impl ActivityCounters {
  pub fn inc(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
  }

  pub fn dec(counter: &Cell<usize>) {
    debug_assert!(counter.get() > 0, "activity counter underflow");
    counter.set(counter.get().saturating_sub(1));
  }
}

/// Point-in-time view of what a [`crate::ScriptContext`] is keeping alive,
/// useful for leak checks in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivitySnapshot {
  /// Stream handles not yet destroyed.
  pub handles: usize,
  /// Keep-alive pins held across all handles.
  pub keep_alive: usize,
  /// Write, shutdown and connect requests not yet completed.
  pub requests: usize,
  /// Callback contexts not yet released.
  pub io_contexts: usize,
  /// Values registered in the reference table.
  pub refs: usize,
}

impl ActivitySnapshot {
  /// True when nothing is pinned and nothing is in flight. Handles themselves
  /// may still exist.
  pub fn is_idle(&self) -> bool {
    self.keep_alive == 0
      && self.requests == 0
      && self.io_contexts == 0
      && self.refs == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_serializes() {
    let snapshot = ActivitySnapshot {
      handles: 2,
      keep_alive: 1,
      ..Default::default()
    };
    assert!(!snapshot.is_idle());
    let json = serde_json::to_value(snapshot).unwrap();
    assert_eq!(json["handles"], 2);
    assert_eq!(json["keep_alive"], 1);
    assert_eq!(json["refs"], 0);
  }
}
