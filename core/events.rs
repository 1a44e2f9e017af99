// Copyright 2018-2025 the Deno authors. MIT license.
use crate::buffer::Buffer;
use crate::error::AnyError;
use crate::error::AsyncError;
use crate::error::StreamError;
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;
use strum::Display;
use strum::EnumIter;
use strum::EnumString;
use strum::IntoStaticStr;

/// The events a stream handle emits to script listeners.
#[derive(
  Copy,
  Clone,
  Debug,
  Eq,
  PartialEq,
  Hash,
  Display,
  IntoStaticStr,
  EnumString,
  EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
  /// A peer is waiting to be accepted on a listening handle.
  Connection,
  /// A chunk was read: `[buffer, nread]`.
  Data,
  /// The peer finished sending.
  End,
  /// An asynchronous failure: `[error]`.
  Error,
  /// An outgoing connect succeeded.
  Connect,
  /// `listen` succeeded.
  Listening,
  /// The close completion ran; no further events follow.
  Closed,
}

/// A value passed to script listeners and callbacks.
#[derive(Clone, Debug)]
pub enum ScriptValue {
  Buffer(Buffer),
  Integer(i64),
  Error(AsyncError),
}

impl ScriptValue {
  pub fn as_buffer(&self) -> Option<&Buffer> {
    match self {
      ScriptValue::Buffer(buf) => Some(buf),
      _ => None,
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      ScriptValue::Integer(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_error(&self) -> Option<&AsyncError> {
    match self {
      ScriptValue::Error(err) => Some(err),
      _ => None,
    }
  }
}

impl fmt::Display for ScriptValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ScriptValue::Buffer(buf) => write!(f, "<Buffer {} bytes>", buf.len()),
      ScriptValue::Integer(n) => write!(f, "{n}"),
      ScriptValue::Error(err) => write!(f, "{err}"),
    }
  }
}

pub type Listener = Rc<dyn Fn(&[ScriptValue]) -> Result<(), AnyError>>;

/// Listeners of a single handle, in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
  entries: SmallVec<[(EventKind, Listener); 4]>,
}

impl Listeners {
  pub fn add(&mut self, kind: EventKind, listener: Listener) {
    self.entries.push((kind, listener));
  }

  /// Removes every listener of `kind` and hands them back, so the caller
  /// controls where they are dropped.
  pub fn remove_all(
    &mut self,
    kind: EventKind,
  ) -> SmallVec<[(EventKind, Listener); 4]> {
    let (removed, kept) = std::mem::take(&mut self.entries)
      .into_iter()
      .partition(|(k, _)| *k == kind);
    self.entries = kept;
    removed
  }

  pub fn count(&self, kind: EventKind) -> usize {
    self.entries.iter().filter(|(k, _)| *k == kind).count()
  }

  pub fn snapshot(&self, kind: EventKind) -> SmallVec<[Listener; 4]> {
    self
      .entries
      .iter()
      .filter(|(k, _)| *k == kind)
      .map(|(_, l)| l.clone())
      .collect()
  }

  pub fn clear(&mut self) -> SmallVec<[(EventKind, Listener); 4]> {
    std::mem::take(&mut self.entries)
  }
}

/// Invokes `listeners` in order. The first failure aborts the dispatch.
/// An `error` event nobody listens to becomes an unhandled error.
pub(crate) fn dispatch(
  kind: EventKind,
  listeners: &[Listener],
  args: &[ScriptValue],
) -> Result<(), StreamError> {
  if listeners.is_empty() {
    if kind == EventKind::Error {
      let message = args
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unspecified error".to_string());
      return Err(StreamError::UnhandledError(message));
    }
    return Ok(());
  }
  for listener in listeners {
    listener(args)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::UV_ECONNRESET;
  use std::cell::RefCell;
  use std::str::FromStr;
  use strum::IntoEnumIterator;

  #[test]
  fn event_names_round_trip() {
    for kind in EventKind::iter() {
      let name: &'static str = kind.into();
      assert_eq!(EventKind::from_str(name).unwrap(), kind);
    }
    assert_eq!(EventKind::Listening.to_string(), "listening");
    assert!(EventKind::from_str("drain").is_err());
  }

  #[test]
  fn dispatch_in_order_and_stop_on_failure() {
    let log = Rc::new(RefCell::new(vec![]));
    let (a, b, c) = (log.clone(), log.clone(), log.clone());
    let listeners: Vec<Listener> = vec![
      Rc::new(move |_: &[ScriptValue]| {
        a.borrow_mut().push(1);
        Ok(())
      }),
      Rc::new(move |_: &[ScriptValue]| {
        b.borrow_mut().push(2);
        Err(anyhow::anyhow!("boom"))
      }),
      Rc::new(move |_: &[ScriptValue]| {
        c.borrow_mut().push(3);
        Ok(())
      }),
    ];
    let err = dispatch(EventKind::Data, &listeners, &[]).unwrap_err();
    assert!(matches!(err, StreamError::Callback(_)));
    assert_eq!(err.to_string(), "boom");
    assert_eq!(*log.borrow(), vec![1, 2]);
  }

  #[test]
  fn unheard_error_is_unhandled() {
    let err = AsyncError::new("on_read", UV_ECONNRESET);
    let result =
      dispatch(EventKind::Error, &[], &[ScriptValue::Error(err.clone())]);
    match result {
      Err(StreamError::UnhandledError(message)) => {
        assert_eq!(message, err.to_string())
      }
      other => panic!("unexpected {other:?}"),
    }
    assert!(dispatch(EventKind::End, &[], &[]).is_ok());
  }

  #[test]
  fn listener_bookkeeping() {
    let mut listeners = Listeners::default();
    let noop: Listener = Rc::new(|_: &[ScriptValue]| Ok(()));
    listeners.add(EventKind::Data, noop.clone());
    listeners.add(EventKind::End, noop.clone());
    listeners.add(EventKind::Data, noop);
    assert_eq!(listeners.count(EventKind::Data), 2);
    assert_eq!(listeners.snapshot(EventKind::End).len(), 1);
    assert_eq!(listeners.remove_all(EventKind::Data).len(), 2);
    assert_eq!(listeners.count(EventKind::Data), 0);
    assert_eq!(listeners.clear().len(), 1);
    assert_eq!(listeners.count(EventKind::End), 0);
  }
}
