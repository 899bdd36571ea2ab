use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_uint, CStr, CString};
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::completer::AsyncCompleter;
use crate::unit::SyncUnit;
use crate::MAX_RESULTS;

const EMPTY: &CStr = c"";

/// Process-wide filename → unit map. Guarded by the timed mutex handed
/// out by [`global`]; every ABI call holds that lock for its lifetime.
pub(crate) struct Registry {
    units: HashMap<String, UnitEntry>,
}

impl Registry {
    fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Look up the entry for `filename`, creating it on first use. The
    /// args supplied at creation stick; later calls reuse the existing
    /// unit whatever args they carry, until the filename is freed.
    pub(crate) fn resolve(&mut self, filename: &CStr, args: &[CString]) -> Result<&mut UnitEntry> {
        let key = filename.to_string_lossy().into_owned();
        match self.units.entry(key) {
            MapEntry::Occupied(occupied) => Ok(occupied.into_mut()),
            MapEntry::Vacant(vacant) => {
                let unit = Arc::new(SyncUnit::parse(filename, args)?);
                Ok(vacant.insert(UnitEntry::new(unit)))
            }
        }
    }

    /// Drop the entry for `filename` if present. The analyzer handles go
    /// away once the last reference does; a background task still running
    /// holds one and disposes them when it finishes.
    pub(crate) fn remove(&mut self, filename: &CStr) {
        if self.units.remove(filename.to_string_lossy().as_ref()).is_some() {
            debug!(file = %filename.to_string_lossy(), "freed translation unit");
        }
    }
}

pub(crate) fn global() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        init_tracing();
        Mutex::new(Registry::new())
    })
}

/// The crate is loaded as a cdylib, so there is no `main` to install a
/// subscriber from; install one lazily and yield to any subscriber the
/// host process set up first.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CLANG_COMPLETE_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// One registered unit plus the transient output arrays its results are
/// published through.
pub(crate) struct UnitEntry {
    completer: AsyncCompleter,
    completions: OutputBuffer,
    diagnostics: OutputBuffer,
}

impl UnitEntry {
    fn new(unit: Arc<SyncUnit>) -> Self {
        Self {
            completer: AsyncCompleter::new(unit),
            completions: OutputBuffer::new(),
            diagnostics: OutputBuffer::new(),
        }
    }

    pub(crate) fn publish_completions(
        &mut self,
        line: c_uint,
        col: c_uint,
        prefix: &[u8],
        timeout_ms: c_int,
        buffer: Option<&[u8]>,
    ) -> *const *const c_char {
        let identifiers = self
            .completer
            .complete_at(line, col, prefix, timeout_ms, buffer);
        self.completions.publish(identifiers.iter().map(String::as_str))
    }

    pub(crate) fn publish_diagnostics(&mut self) -> *const *const c_char {
        let diagnostics = self.completer.diagnostics();
        self.diagnostics.publish(diagnostics.iter().map(String::as_str))
    }

    pub(crate) fn reparse(&self, buffer: Option<&[u8]>) {
        self.completer.reparse(buffer);
    }
}

/// Owned strings plus the pointer array exported across the ABI. The
/// pointers reference the `CString` allocations held alongside them and
/// stay valid until the next `publish` or until the entry is removed.
struct OutputBuffer {
    strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

// The pointer array only ever targets the CStrings owned by the same
// buffer; moving the buffer between threads moves both together.
unsafe impl Send for OutputBuffer {}

impl OutputBuffer {
    fn new() -> Self {
        Self {
            strings: Vec::new(),
            ptrs: Vec::new(),
        }
    }

    /// Copy up to [`MAX_RESULTS`] items and terminate the exported array
    /// with a pointer to the empty string.
    fn publish<'a, I>(&mut self, items: I) -> *const *const c_char
    where
        I: ExactSizeIterator<Item = &'a str>,
    {
        if items.len() > MAX_RESULTS {
            debug!(dropped = items.len() - MAX_RESULTS, "truncating output array");
        }

        self.strings.clear();
        self.strings.extend(
            items
                .take(MAX_RESULTS)
                .filter_map(|item| CString::new(item).ok()),
        );

        self.ptrs.clear();
        self.ptrs.extend(self.strings.iter().map(|s| s.as_ptr()));
        self.ptrs.push(EMPTY.as_ptr());
        self.ptrs.as_ptr()
    }
}
