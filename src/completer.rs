use std::collections::BTreeSet;
use std::ffi::{c_int, c_uint};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::unit::{starts_with, SyncUnit};

/// Shared runtime for background completion work. The crate has no `main`
/// to build one in, so the first unit to need it creates it.
fn runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("clang-complete")
            .enable_time()
            .build()
            .expect("failed to build completion runtime")
    })
}

/// Single-slot cache of the most recent completion request. Holds the
/// cursor the request was issued for, plus the in-flight computation and
/// whatever it last materialized.
struct PendingQuery {
    line: c_uint,
    col: c_uint,
    task: Option<JoinHandle<BTreeSet<String>>>,
    cached: BTreeSet<String>,
}

impl PendingQuery {
    fn new() -> Self {
        Self {
            line: 0,
            col: 0,
            task: None,
            cached: BTreeSet::new(),
        }
    }

    /// Point the slot at a new cursor location. The previous task keeps
    /// running detached; whatever it produces is never observed again.
    fn reset(&mut self, line: c_uint, col: c_uint, task: JoinHandle<BTreeSet<String>>) {
        if self.task.is_some() {
            debug!(line, col, "superseding in-flight completion");
        }
        self.line = line;
        self.col = col;
        self.cached.clear();
        self.task = Some(task);
    }

    /// Wait up to `timeout_ms` for the in-flight computation and fold its
    /// result into the cache. A timeout leaves the task in place for the
    /// next call; the handle is consumed at most once.
    fn settle(&mut self, timeout_ms: c_int) {
        if timeout_ms <= 0 {
            return;
        }
        let Some(mut task) = self.task.take() else {
            return;
        };

        let wait = Duration::from_millis(timeout_ms as u64);
        match runtime().block_on(tokio::time::timeout(wait, &mut task)) {
            Ok(Ok(identifiers)) => self.cached = identifiers,
            Ok(Err(err)) => warn!("background completion failed: {err}"),
            Err(_) => self.task = Some(task),
        }
    }
}

/// Completion front-end for one unit. Completions for a cursor location
/// are computed once, in the background and with an empty prefix; calls
/// that merely extend the prefix at the same location filter the cached
/// set and can return without blocking.
pub struct AsyncCompleter {
    unit: Arc<SyncUnit>,
    query: Mutex<PendingQuery>,
}

impl AsyncCompleter {
    pub fn new(unit: Arc<SyncUnit>) -> Self {
        Self {
            unit,
            query: Mutex::new(PendingQuery::new()),
        }
    }

    /// Serve completions at the one-based cursor from the cache, waiting
    /// at most `timeout_ms` for a fresh computation. A location change
    /// dispatches a new background request and may well return the empty
    /// set until that request settles; the next keystroke recovers.
    pub fn complete_at(
        &self,
        line: c_uint,
        col: c_uint,
        prefix: &[u8],
        timeout_ms: c_int,
        buffer: Option<&[u8]>,
    ) -> BTreeSet<String> {
        // The timed wait below runs under the query lock. The background
        // task only ever takes the unit lock, so it cannot block on us.
        let mut query = self.query.lock();

        if (line, col) != (query.line, query.col) {
            let unit = Arc::clone(&self.unit);
            // The caller's buffer is only borrowed for this call; the task
            // needs its own copy.
            let owned: Option<Vec<u8>> = buffer.map(|bytes| bytes.to_vec());
            let task = runtime()
                .spawn_blocking(move || unit.complete_at(line, col, b"", owned.as_deref()));
            query.reset(line, col, task);
        }

        query.settle(timeout_ms);

        query
            .cached
            .iter()
            .filter(|identifier| starts_with(identifier, prefix))
            .cloned()
            .collect()
    }

    pub fn reparse(&self, buffer: Option<&[u8]>) {
        self.unit.reparse(buffer);
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.unit.diagnostics()
    }
}
