use std::collections::BTreeSet;
use std::ffi::{c_char, c_int, c_uint, c_ulong, CStr, CString};

use anyhow::{anyhow, Result};
use clang_sys::{
    clang_codeCompleteAt, clang_createIndex, clang_defaultDiagnosticDisplayOptions,
    clang_defaultEditingTranslationUnitOptions, clang_disposeCodeCompleteResults,
    clang_disposeDiagnostic, clang_disposeIndex, clang_disposeString,
    clang_disposeTranslationUnit, clang_formatDiagnostic, clang_getCString,
    clang_getCompletionAvailability, clang_getCompletionChunkKind, clang_getCompletionChunkText,
    clang_getDiagnostic, clang_getDiagnosticSeverity, clang_getNumCompletionChunks,
    clang_getNumDiagnostics, clang_parseTranslationUnit, clang_reparseTranslationUnit,
    CXAvailability_Available, CXCodeCompleteResults, CXCodeComplete_IncludeMacros,
    CXCompletionChunk_TypedText, CXCompletionResult, CXDiagnostic_Ignored, CXIndex, CXString,
    CXTranslationUnit, CXUnsavedFile,
};
use tracing::{debug, warn};

/// One libclang index + translation unit, owned as a pair. All libclang
/// strings obtained through this type are copied and disposed before the
/// producing call returns; no libclang-owned pointer escapes.
pub struct TranslationUnit {
    index: CXIndex,
    unit: CXTranslationUnit,
    filename: CString,
}

// The raw handles are only ever touched through the owning `SyncUnit`,
// which serializes every call behind its mutex.
unsafe impl Send for TranslationUnit {}

impl TranslationUnit {
    pub fn parse(filename: &CStr, args: &[CString]) -> Result<Self> {
        let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();

        unsafe {
            let index = clang_createIndex(1, 1);
            let unit = clang_parseTranslationUnit(
                index,
                filename.as_ptr(),
                if arg_ptrs.is_empty() {
                    std::ptr::null()
                } else {
                    arg_ptrs.as_ptr()
                },
                arg_ptrs.len() as c_int,
                std::ptr::null_mut(),
                0,
                clang_defaultEditingTranslationUnitOptions(),
            );

            if unit.is_null() {
                clang_disposeIndex(index);
                return Err(anyhow!(
                    "Unable to parse {} with libclang",
                    filename.to_string_lossy()
                ));
            }

            debug!(file = %filename.to_string_lossy(), "parsed translation unit");
            Ok(Self {
                index,
                unit,
                filename: filename.to_owned(),
            })
        }
    }

    /// Re-parse against the on-disk file, or against `buffer` when the
    /// editor holds unsaved edits. A libclang failure here leaves the unit
    /// in its error state; it surfaces through the next `diagnostics` call.
    pub fn reparse(&mut self, buffer: Option<&[u8]>) {
        let status = unsafe {
            match buffer {
                None => clang_reparseTranslationUnit(self.unit, 0, std::ptr::null_mut(), 0),
                Some(bytes) => {
                    let mut unsaved = self.unsaved(bytes);
                    clang_reparseTranslationUnit(self.unit, 1, &mut unsaved, 0)
                }
            }
        };
        if status != 0 {
            warn!(
                file = %self.filename.to_string_lossy(),
                status, "libclang failed to reparse"
            );
        }
    }

    /// Code-complete at the one-based cursor and collect the typed text of
    /// every available completion. Duplicates collapse into the set.
    pub fn complete_at(
        &mut self,
        line: c_uint,
        col: c_uint,
        buffer: Option<&[u8]>,
    ) -> BTreeSet<String> {
        let raw = unsafe {
            match buffer {
                None => clang_codeCompleteAt(
                    self.unit,
                    self.filename.as_ptr(),
                    line,
                    col,
                    std::ptr::null_mut(),
                    0,
                    CXCodeComplete_IncludeMacros,
                ),
                Some(bytes) => {
                    let mut unsaved = self.unsaved(bytes);
                    clang_codeCompleteAt(
                        self.unit,
                        self.filename.as_ptr(),
                        line,
                        col,
                        &mut unsaved,
                        1,
                        CXCodeComplete_IncludeMacros,
                    )
                }
            }
        };

        let Some(results) = CompletionResults::from_raw(raw) else {
            debug!(
                file = %self.filename.to_string_lossy(),
                line, col, "libclang returned no completions"
            );
            return BTreeSet::new();
        };

        let mut identifiers = BTreeSet::new();
        for completion in results.as_slice() {
            if let Some(text) = unsafe { typed_text(completion) } {
                identifiers.insert(text);
            }
        }
        identifiers
    }

    /// Formatted diagnostics in emission order, skipping ignored severity.
    pub fn diagnostics(&mut self) -> Vec<String> {
        let mut formatted = Vec::new();
        unsafe {
            for i in 0..clang_getNumDiagnostics(self.unit) {
                let diagnostic = clang_getDiagnostic(self.unit, i);
                if diagnostic.is_null() {
                    continue;
                }
                if clang_getDiagnosticSeverity(diagnostic) != CXDiagnostic_Ignored {
                    formatted.push(cxstring_to_string(clang_formatDiagnostic(
                        diagnostic,
                        clang_defaultDiagnosticDisplayOptions(),
                    )));
                }
                clang_disposeDiagnostic(diagnostic);
            }
        }
        formatted
    }

    fn unsaved(&self, buffer: &[u8]) -> CXUnsavedFile {
        CXUnsavedFile {
            Filename: self.filename.as_ptr(),
            Contents: buffer.as_ptr() as *const c_char,
            Length: buffer.len() as c_ulong,
        }
    }
}

impl Drop for TranslationUnit {
    fn drop(&mut self) {
        unsafe {
            clang_disposeTranslationUnit(self.unit);
            clang_disposeIndex(self.index);
        }
    }
}

/// Owning guard around a `CXCodeCompleteResults` handle.
struct CompletionResults {
    raw: *mut CXCodeCompleteResults,
}

impl CompletionResults {
    fn from_raw(raw: *mut CXCodeCompleteResults) -> Option<Self> {
        if raw.is_null() {
            None
        } else {
            Some(Self { raw })
        }
    }

    fn as_slice(&self) -> &[CXCompletionResult] {
        unsafe {
            let results = (*self.raw).Results;
            let len = (*self.raw).NumResults as usize;
            if results.is_null() || len == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(results, len)
            }
        }
    }
}

impl Drop for CompletionResults {
    fn drop(&mut self) {
        unsafe { clang_disposeCodeCompleteResults(self.raw) }
    }
}

unsafe fn typed_text(completion: &CXCompletionResult) -> Option<String> {
    if clang_getCompletionAvailability(completion.CompletionString) != CXAvailability_Available {
        return None;
    }

    let mut text = String::new();
    for chunk in 0..clang_getNumCompletionChunks(completion.CompletionString) {
        if clang_getCompletionChunkKind(completion.CompletionString, chunk)
            == CXCompletionChunk_TypedText
        {
            let spelling = clang_getCompletionChunkText(completion.CompletionString, chunk);
            text.push_str(&cxstring_to_string(spelling));
        }
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub(crate) unsafe fn cxstring_to_string(s: CXString) -> String {
    let c_str = clang_getCString(s);
    let result = if c_str.is_null() {
        String::new()
    } else {
        CStr::from_ptr(c_str).to_string_lossy().into_owned()
    };
    clang_disposeString(s);
    result
}
