// Copyright 2018-2025 the Deno authors. MIT license.

//! Process environment accessors exposed to script code.
//!
//! Every accessor in this module takes the same lock, so they never race
//! each other. Nothing stops other code in the process from touching the
//! environment, which is why the mutating accessors are `unsafe`.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
  // The guarded data is `()`, so a poisoned lock carries no broken state.
  ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvError {
  #[error("invalid environment variable name {0:?}")]
  InvalidName(String),
  #[error("environment variable {0:?} has a value containing NUL")]
  InvalidValue(String),
  #[error("expected an entry of the form NAME=value, got {0:?}")]
  InvalidEntry(String),
}

fn check_name(name: &str) -> Result<(), EnvError> {
  if name.is_empty() || name.contains(['=', '\0']) {
    return Err(EnvError::InvalidName(name.to_string()));
  }
  Ok(())
}

fn check_value(name: &str, value: &str) -> Result<(), EnvError> {
  if value.contains('\0') {
    return Err(EnvError::InvalidValue(name.to_string()));
  }
  Ok(())
}

/// Names of every variable in the environment, in the order the process
/// environment lists them.
pub fn keys() -> Vec<String> {
  let _guard = lock();
  std::env::vars_os()
    .map(|(name, _)| name.to_string_lossy().into_owned())
    .collect()
}

/// The value of `name`, or `None` when it is unset. Values that are not
/// valid UTF-8 are converted lossily.
pub fn get(name: &str) -> Option<String> {
  if check_name(name).is_err() {
    return None;
  }
  let _guard = lock();
  std::env::var_os(name).map(|value| value.to_string_lossy().into_owned())
}

/// Sets a variable from a `NAME=value` entry. Everything after the first
/// `=` is the value.
///
/// # Safety
///
/// Same as [`set`].
pub unsafe fn put(entry: &str) -> Result<(), EnvError> {
  let Some((name, value)) = entry.split_once('=') else {
    return Err(EnvError::InvalidEntry(entry.to_string()));
  };
  // SAFETY: the caller upholds the contract of `set`.
  unsafe { set(name, value, true) }
}

/// Sets `name` to `value`. An existing variable is left untouched unless
/// `overwrite` is set.
///
/// # Safety
///
/// No other thread may read or write the process environment while this
/// runs, except through the accessors of this module.
pub unsafe fn set(
  name: &str,
  value: &str,
  overwrite: bool,
) -> Result<(), EnvError> {
  check_name(name)?;
  check_value(name, value)?;
  let _guard = lock();
  if !overwrite && std::env::var_os(name).is_some() {
    return Ok(());
  }
  log::trace!("env set {name}");
  // SAFETY: accessors of this module are serialized by `ENV_LOCK`, and the
  // caller guarantees that nothing else touches the environment meanwhile.
  unsafe { std::env::set_var(name, value) };
  Ok(())
}

/// Removes `name` from the environment.
///
/// # Safety
///
/// Same as [`set`].
pub unsafe fn unset(name: &str) -> Result<(), EnvError> {
  check_name(name)?;
  let _guard = lock();
  log::trace!("env unset {name}");
  // SAFETY: see `set`.
  unsafe { std::env::remove_var(name) };
  Ok(())
}
