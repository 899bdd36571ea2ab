//! Asynchronous code completion and diagnostics for a C-family source
//! file, driven through a C ABI by an editor plugin.
//!
//! libclang does the actual analysis; this crate is the caching and
//! concurrency layer that makes it usable from an editor. Each filename
//! gets one cached translation unit with all access serialized (libclang
//! is not reentrant on a single unit). Completion answers come from the
//! last computed set while a fresh one is produced in the background, so
//! a keystroke that merely extends the current prefix filters the cached
//! set and returns without blocking.
//!
//! The exported surface is the four `extern "C"` functions in [`abi`].

pub mod abi;
mod clang;
mod completer;
mod registry;
mod unit;

/// Cap on the number of strings exported through one output array.
/// Anything beyond it is dropped silently.
pub const MAX_RESULTS: usize = 8192;

/// Historic default completion wait in milliseconds. Advisory only; the
/// `timeout_ms` argument of the completion call is authoritative.
pub const ASYNC_WAIT_MS: u64 = 200;
