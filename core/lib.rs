// Copyright 2018-2025 the Deno authors. MIT license.

//! Stream bindings between a libuv-style event loop and an embedded script
//! runtime.
//!
//! A [`StreamHandle`] pairs a native stream with its script-visible state:
//! listeners, a keep-alive count and the buffer of the read in flight.
//! Native completions find their handle through a [`KeepAlive`] guard or a
//! [`WeakStreamHandle`], never through a raw pointer, so a handle cannot be
//! freed while the loop still refers to it.

mod buffer;
mod context;
pub mod env;
mod error;
mod event_loop;
mod events;
mod handle;
mod io_ctx;
mod native;
mod ref_table;
mod stats;
mod stream;
mod uv;

pub use crate::buffer::Buffer;
pub use crate::buffer::BufferError;
pub use crate::context::ContextOptions;
pub use crate::context::DEFAULT_BACKLOG;
pub use crate::context::ScriptContext;
pub use crate::context::UncaughtErrorHandler;
pub use crate::env::EnvError;
pub use crate::error::AnyError;
pub use crate::error::AsyncError;
pub use crate::error::StreamError;
pub use crate::error::UV_EADDRINUSE;
pub use crate::error::UV_EADDRNOTAVAIL;
pub use crate::error::UV_EAGAIN;
pub use crate::error::UV_EBADF;
pub use crate::error::UV_ECANCELED;
pub use crate::error::UV_ECONNABORTED;
pub use crate::error::UV_ECONNREFUSED;
pub use crate::error::UV_ECONNRESET;
pub use crate::error::UV_EINVAL;
pub use crate::error::UV_EIO;
pub use crate::error::UV_EISCONN;
pub use crate::error::UV_ENOBUFS;
pub use crate::error::UV_ENOTCONN;
pub use crate::error::UV_EOF;
pub use crate::error::UV_EPERM;
pub use crate::error::UV_EPIPE;
pub use crate::error::UV_ETIMEDOUT;
pub use crate::error::UvError;
pub use crate::event_loop::RunMode;
pub use crate::events::EventKind;
pub use crate::events::Listener;
pub use crate::events::ScriptValue;
pub use crate::handle::KeepAlive;
pub use crate::handle::StreamHandle;
pub use crate::handle::StreamState;
pub use crate::handle::WeakStreamHandle;
pub use crate::io_ctx::Callback;
pub use crate::io_ctx::IoCtx;
pub use crate::native::AllocCb;
pub use crate::native::CloseCb;
pub use crate::native::ConnectionCb;
pub use crate::native::NativeStream;
pub use crate::native::ReadCb;
pub use crate::native::RequestCb;
pub use crate::ref_table::RefId;
pub use crate::ref_table::RefTable;
pub use crate::stats::ActivitySnapshot;
pub use crate::uv::UvLoop;
pub use crate::uv::UvTcp;

/// A stream handle over a TCP socket of a [`UvLoop`].
pub type TcpHandle = StreamHandle<UvTcp>;
