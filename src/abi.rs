//! The C ABI exported to editor plugins. Four symbols, all taking
//! nul-terminated strings and primitive integers, all returning either
//! nothing or a pointer to an array of C strings terminated by the empty
//! string. Returned arrays are owned by the registry entry for the
//! filename and stay valid until the next call for that filename or
//! until it is freed; callers never free them.

use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::slice;
use std::time::Duration;

use tracing::{debug, warn};

use crate::registry;

const COMPLETION_LOCK_WAIT: Duration = Duration::from_millis(10);
const DIAGNOSTIC_LOCK_WAIT: Duration = Duration::from_millis(250);

const EMPTY: &CStr = c"";

/// The degraded answer: a one-element array holding only the terminating
/// empty string.
struct Sentinel([*const c_char; 1]);

// Points at the empty C string literal, which lives forever.
unsafe impl Sync for Sentinel {}

static SENTINEL: Sentinel = Sentinel([EMPTY.as_ptr()]);

fn sentinel() -> *const *const c_char {
    SENTINEL.0.as_ptr()
}

/// Completions at the one-based (`line`, `col`) whose typed text begins
/// with `prefix`, served from the per-location cache. `timeout_ms <= 0`
/// never blocks on an in-flight computation. A null `buffer` means the
/// on-disk contents; otherwise `buffer[0..len]` is the unsaved text.
///
/// The unit for `filename` is created with `args` on first use; later
/// calls reuse it and ignore their args until `clang_complete_free_tu`.
/// Returns the sentinel array when the registry is busy or the unit
/// cannot be created.
///
/// # Safety
/// `filename` and `prefix` must be null or valid nul-terminated strings,
/// `args` null or `argc` valid pointers to such strings, and `buffer`
/// null or readable for `len` bytes, all for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn clang_complete_get_completions(
    filename: *const c_char,
    args: *const *const c_char,
    argc: c_int,
    line: c_uint,
    col: c_uint,
    prefix: *const c_char,
    timeout_ms: c_int,
    buffer: *const c_char,
    len: c_uint,
) -> *const *const c_char {
    let Some(filename) = opt_cstr(filename) else {
        return sentinel();
    };
    let args = collect_args(args, argc);
    let prefix = opt_cstr(prefix).map(CStr::to_bytes).unwrap_or(b"");
    let buffer = opt_bytes(buffer, len);

    let Some(mut registry) = registry::global().try_lock_for(COMPLETION_LOCK_WAIT) else {
        debug!("registry busy, returning sentinel to completion caller");
        return sentinel();
    };
    match registry.resolve(filename, &args) {
        Ok(entry) => entry.publish_completions(line, col, prefix, timeout_ms, buffer),
        Err(err) => {
            warn!("completions unavailable for {}: {err:#}", filename.to_string_lossy());
            sentinel()
        }
    }
}

/// Reparse `filename` from disk and return its formatted diagnostics.
/// Returns the sentinel array when the registry is busy or the unit
/// cannot be created; a well-formed file yields only the terminator.
///
/// # Safety
/// `filename` must be null or a valid nul-terminated string and `args`
/// null or `argc` valid pointers to such strings, for the duration of
/// the call.
#[no_mangle]
pub unsafe extern "C" fn clang_complete_get_diagnostics(
    filename: *const c_char,
    args: *const *const c_char,
    argc: c_int,
) -> *const *const c_char {
    let Some(filename) = opt_cstr(filename) else {
        return sentinel();
    };
    let args = collect_args(args, argc);

    let Some(mut registry) = registry::global().try_lock_for(DIAGNOSTIC_LOCK_WAIT) else {
        debug!("registry busy, returning sentinel to diagnostics caller");
        return sentinel();
    };
    match registry.resolve(filename, &args) {
        Ok(entry) => {
            entry.reparse(None);
            entry.publish_diagnostics()
        }
        Err(err) => {
            warn!("diagnostics unavailable for {}: {err:#}", filename.to_string_lossy());
            sentinel()
        }
    }
}

/// Reparse `filename`, against `buffer[0..len]` when `buffer` is
/// non-null. Blocks until the registry is available.
///
/// # Safety
/// Pointer arguments as for [`clang_complete_get_completions`].
#[no_mangle]
pub unsafe extern "C" fn clang_complete_reparse(
    filename: *const c_char,
    args: *const *const c_char,
    argc: c_int,
    buffer: *const c_char,
    len: c_uint,
) {
    let Some(filename) = opt_cstr(filename) else {
        return;
    };
    let args = collect_args(args, argc);
    let buffer = opt_bytes(buffer, len);

    let mut registry = registry::global().lock();
    match registry.resolve(filename, &args) {
        Ok(entry) => entry.reparse(buffer),
        Err(err) => warn!("reparse failed for {}: {err:#}", filename.to_string_lossy()),
    }
}

/// Forget the unit for `filename`; the next call for it parses afresh.
/// A second free for the same filename is a no-op. Callers must not free
/// a filename while another call for it is outstanding.
///
/// # Safety
/// `filename` must be null or a valid nul-terminated string for the
/// duration of the call.
#[no_mangle]
pub unsafe extern "C" fn clang_complete_free_tu(filename: *const c_char) {
    let Some(filename) = opt_cstr(filename) else {
        return;
    };
    registry::global().lock().remove(filename);
}

unsafe fn opt_cstr<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr))
    }
}

unsafe fn collect_args(args: *const *const c_char, argc: c_int) -> Vec<CString> {
    if args.is_null() || argc <= 0 {
        return Vec::new();
    }
    slice::from_raw_parts(args, argc as usize)
        .iter()
        .filter_map(|&arg| opt_cstr(arg))
        .map(CStr::to_owned)
        .collect()
}

unsafe fn opt_bytes<'a>(buffer: *const c_char, len: c_uint) -> Option<&'a [u8]> {
    if buffer.is_null() {
        None
    } else {
        Some(slice::from_raw_parts(buffer as *const u8, len as usize))
    }
}
