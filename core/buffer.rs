// Copyright 2018-2025 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferError {
  #[error("buffer is read-only")]
  ReadOnly,
  #[error("range {offset}+{len} is out of bounds for a buffer of {size} bytes")]
  OutOfRange {
    offset: usize,
    len: usize,
    size: usize,
  },
  #[error("buffer storage is already borrowed")]
  InUse,
}

struct Storage {
  bytes: RefCell<Vec<u8>>,
  read_only: Cell<bool>,
}

/// A view over shared byte storage.
///
/// Cloning a `Buffer` or taking a [`Buffer::slice`] never copies: every view
/// aliases the same storage, and the read-only flag lives on the storage, so
/// marking one view read-only marks all of them.
#[derive(Clone)]
pub struct Buffer {
  storage: Rc<Storage>,
  offset: usize,
  len: usize,
}

impl Buffer {
  /// Allocates a zero-filled buffer of `len` bytes.
  pub fn new(len: usize) -> Self {
    Self::from(vec![0; len])
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Returns a view of `len` bytes starting at `offset` (relative to this
  /// view) over the same storage.
  pub fn slice(&self, offset: usize, len: usize) -> Result<Buffer, BufferError> {
    match offset.checked_add(len) {
      Some(end) if end <= self.len => Ok(Buffer {
        storage: self.storage.clone(),
        offset: self.offset + offset,
        len,
      }),
      _ => Err(BufferError::OutOfRange {
        offset,
        len,
        size: self.len,
      }),
    }
  }

  pub fn is_read_only(&self) -> bool {
    self.storage.read_only.get()
  }

  /// Sets the read-only flag and returns its previous value.
  pub fn set_read_only(&self, read_only: bool) -> bool {
    self.storage.read_only.replace(read_only)
  }

  /// Runs `f` over the bytes of the view. Fails while a
  /// [`Buffer::with_bytes_mut`] call on the same storage is in progress.
  pub fn with_bytes<R>(
    &self,
    f: impl FnOnce(&[u8]) -> R,
  ) -> Result<R, BufferError> {
    let bytes = self
      .storage
      .bytes
      .try_borrow()
      .map_err(|_| BufferError::InUse)?;
    Ok(f(&bytes[self.offset..self.offset + self.len]))
  }

  pub fn with_bytes_mut<R>(
    &self,
    f: impl FnOnce(&mut [u8]) -> R,
  ) -> Result<R, BufferError> {
    if self.is_read_only() {
      return Err(BufferError::ReadOnly);
    }
    let mut bytes = self
      .storage
      .bytes
      .try_borrow_mut()
      .map_err(|_| BufferError::InUse)?;
    Ok(f(&mut bytes[self.offset..self.offset + self.len]))
  }

  /// Copies `data` into the view at `offset`.
  pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), BufferError> {
    let range = self.slice(offset, data.len())?;
    range.with_bytes_mut(|bytes| bytes.copy_from_slice(data))
  }

  pub fn to_vec(&self) -> Result<Vec<u8>, BufferError> {
    self.with_bytes(|bytes| bytes.to_vec())
  }

  /// True when both views cover exactly the same bytes of the same storage.
  pub fn same_view(&self, other: &Buffer) -> bool {
    self.shares_storage(other)
      && self.offset == other.offset
      && self.len == other.len
  }

  pub fn shares_storage(&self, other: &Buffer) -> bool {
    Rc::ptr_eq(&self.storage, &other.storage)
  }
}

impl From<Vec<u8>> for Buffer {
  fn from(bytes: Vec<u8>) -> Self {
    let len = bytes.len();
    Self {
      storage: Rc::new(Storage {
        bytes: RefCell::new(bytes),
        read_only: Cell::new(false),
      }),
      offset: 0,
      len,
    }
  }
}

impl From<&[u8]> for Buffer {
  fn from(bytes: &[u8]) -> Self {
    Self::from(bytes.to_vec())
  }
}

impl From<&str> for Buffer {
  fn from(s: &str) -> Self {
    Self::from(s.as_bytes())
  }
}

impl fmt::Debug for Buffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Buffer")
      .field("offset", &self.offset)
      .field("len", &self.len)
      .field("read_only", &self.is_read_only())
      .finish()
  }
}
