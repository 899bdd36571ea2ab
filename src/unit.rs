use std::collections::BTreeSet;
use std::ffi::{c_uint, CStr, CString};

use anyhow::Result;
use parking_lot::Mutex;

use crate::clang::TranslationUnit;

/// A translation unit behind a non-recursive per-unit mutex. libclang is
/// not reentrant on a single unit, so every operation holds the lock for
/// its full duration.
pub struct SyncUnit {
    inner: Mutex<TranslationUnit>,
}

impl SyncUnit {
    pub fn parse(filename: &CStr, args: &[CString]) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(TranslationUnit::parse(filename, args)?),
        })
    }

    pub fn reparse(&self, buffer: Option<&[u8]>) {
        self.inner.lock().reparse(buffer);
    }

    /// Completions at the cursor whose typed text starts with `prefix`.
    /// An analyzer error or an empty completion result both come back as
    /// the empty set.
    pub fn complete_at(
        &self,
        line: c_uint,
        col: c_uint,
        prefix: &[u8],
        buffer: Option<&[u8]>,
    ) -> BTreeSet<String> {
        let mut identifiers = self.inner.lock().complete_at(line, col, buffer);
        identifiers.retain(|identifier| starts_with(identifier, prefix));
        identifiers
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.inner.lock().diagnostics()
    }
}

/// Case-sensitive, byte-wise prefix match. The empty prefix matches all.
pub(crate) fn starts_with(identifier: &str, prefix: &[u8]) -> bool {
    identifier.as_bytes().starts_with(prefix)
}
