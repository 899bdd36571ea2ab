#![allow(dead_code)]

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::thread;
use std::time::Duration;

use clang_complete::abi::{
    clang_complete_free_tu, clang_complete_get_completions, clang_complete_get_diagnostics,
    clang_complete_reparse,
};

pub fn cstring(s: &str) -> CString {
    CString::new(s).unwrap()
}

pub unsafe fn read_strings(mut head: *const *const c_char) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        let s = CStr::from_ptr(*head);
        if s.is_empty() {
            return out;
        }
        out.push(s.to_string_lossy().into_owned());
        head = head.add(1);
    }
}

pub fn get_completions(
    path: &Path,
    args: &[&str],
    line: u32,
    col: u32,
    prefix: &str,
    timeout_ms: i32,
    buffer: Option<&str>,
) -> Vec<String> {
    let filename = cstring(path.to_str().unwrap());
    let args: Vec<CString> = args.iter().map(|a| cstring(a)).collect();
    let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
    let prefix = cstring(prefix);
    let (buffer_ptr, buffer_len) = match buffer {
        Some(text) => (text.as_ptr() as *const c_char, text.len() as u32),
        None => (std::ptr::null(), 0),
    };

    unsafe {
        let head = clang_complete_get_completions(
            filename.as_ptr(),
            arg_ptrs.as_ptr(),
            arg_ptrs.len() as c_int,
            line,
            col,
            prefix.as_ptr(),
            timeout_ms,
            buffer_ptr,
            buffer_len,
        );
        read_strings(head)
    }
}

/// Drive the asynchronous protocol until the background computation has
/// produced something for this prefix.
pub fn settle_completions(
    path: &Path,
    args: &[&str],
    line: u32,
    col: u32,
    prefix: &str,
    buffer: Option<&str>,
) -> Vec<String> {
    for _ in 0..40 {
        let results = get_completions(path, args, line, col, prefix, 2000, buffer);
        if !results.is_empty() {
            return results;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("completions never settled for {}", path.display());
}

/// Read the cached set without blocking on the in-flight future. Another
/// test can hold the registry lock across its own timed wait, so an empty
/// answer is retried a few times before it counts.
pub fn cached_completions(
    path: &Path,
    args: &[&str],
    line: u32,
    col: u32,
    prefix: &str,
    buffer: Option<&str>,
) -> Vec<String> {
    for _ in 0..40 {
        let results = get_completions(path, args, line, col, prefix, 0, buffer);
        if !results.is_empty() {
            return results;
        }
        thread::sleep(Duration::from_millis(25));
    }
    panic!("cached completions never became available for {}", path.display());
}

pub fn get_diagnostics(path: &Path, args: &[&str]) -> Vec<String> {
    let filename = cstring(path.to_str().unwrap());
    let args: Vec<CString> = args.iter().map(|a| cstring(a)).collect();
    let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();

    unsafe {
        let head = clang_complete_get_diagnostics(
            filename.as_ptr(),
            arg_ptrs.as_ptr(),
            arg_ptrs.len() as c_int,
        );
        read_strings(head)
    }
}

/// Retry past registry contention until diagnostics come back non-empty.
pub fn settle_diagnostics(path: &Path, args: &[&str]) -> Vec<String> {
    for _ in 0..40 {
        let diagnostics = get_diagnostics(path, args);
        if !diagnostics.is_empty() {
            return diagnostics;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("diagnostics never settled for {}", path.display());
}

pub fn reparse(path: &Path, args: &[&str], buffer: Option<&str>) {
    let filename = cstring(path.to_str().unwrap());
    let args: Vec<CString> = args.iter().map(|a| cstring(a)).collect();
    let arg_ptrs: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
    let (buffer_ptr, buffer_len) = match buffer {
        Some(text) => (text.as_ptr() as *const c_char, text.len() as u32),
        None => (std::ptr::null(), 0),
    };

    unsafe {
        clang_complete_reparse(
            filename.as_ptr(),
            arg_ptrs.as_ptr(),
            arg_ptrs.len() as c_int,
            buffer_ptr,
            buffer_len,
        );
    }
}

pub fn free(path: &Path) {
    let filename = cstring(path.to_str().unwrap());
    unsafe { clang_complete_free_tu(filename.as_ptr()) };
}
