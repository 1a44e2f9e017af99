// Copyright 2018-2025 the Deno authors. MIT license.
use crate::error::StreamError;
use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A `RefId` is an integer value referencing a script value that has been
/// pinned in a [`RefTable`]. While registered, the value cannot be collected,
/// no matter what the script side does with its own references.
pub type RefId = u32;

/// Map-like data structure keeping script values alive on behalf of native
/// code.
///
/// Values of different types can be stored in the same table; the type is
/// erased at runtime and must be statically known when retrieving it through
/// [`RefTable::lookup`].
#[derive(Default)]
pub struct RefTable {
  index: BTreeMap<RefId, Rc<dyn Any>>,
  next_id: RefId,
}

impl RefTable {
  /// Inserts a value into the table, which takes ownership of it.
  ///
  /// Returns a unique id, which acts as a key for this value.
  pub fn register<T: Any>(&mut self, value: T) -> RefId {
    let id = self.next_id;
    let removed = self.index.insert(id, Rc::new(value));
    assert!(removed.is_none());
    self.next_id += 1;
    id
  }

  /// Returns the value of type `T` registered under `id`. Fails when `id` is
  /// not present or the value has a different type.
  pub fn lookup<T: Any>(&self, id: RefId) -> Result<Rc<T>, StreamError> {
    self
      .index
      .get(&id)
      .cloned()
      .and_then(|rc| rc.downcast::<T>().ok())
      .ok_or(StreamError::BadRefId(id))
  }

  /// Drops the table's reference. Returns the value if it was registered.
  pub fn release(&mut self, id: RefId) -> Option<Rc<dyn Any>> {
    self.index.remove(&id)
  }

  /// Number of values currently registered, reported in activity stats.
  pub(crate) fn len(&self) -> usize {
    self.index.len()
  }
}
