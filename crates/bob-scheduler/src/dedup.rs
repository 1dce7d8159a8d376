// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bob_error::Error;
use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

type CookFuture<'a> = Shared<LocalBoxFuture<'a, Result<(), Arc<Error>>>>;

/// Deduplicates concurrent cook requests for the same workspace path,
/// mirroring the original's `__cookTasks`/`__buildIdTasks`: an `asyncio.Task`
/// is naturally shared between every awaiter asking for the same step, so a
/// diamond-shaped dependency graph only cooks a shared step once. We get the
/// same sharing here via `futures::future::Shared`; `Error` isn't `Clone` (a
/// `BuildError`'s stack is set in place), so the shared future's output is
/// wrapped in `Arc`.
#[derive(Default)]
pub(crate) struct TaskMap<'a> {
    tasks: Mutex<HashMap<String, CookFuture<'a>>>,
}

impl<'a> TaskMap<'a> {
    pub(crate) fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }

    /// Register (or join) the cook task for `path`. Returns the shared
    /// future and whether this call was the one that created it -- only the
    /// creator is responsible for reporting the eventual error and for
    /// evicting the entry on success, matching `__createTask`'s `wrapTask`
    /// (only the task's own body runs once; other awaiters just observe the
    /// same outcome).
    pub(crate) fn share<F>(&self, path: String, make: F) -> (CookFuture<'a>, bool)
    where
        F: std::future::Future<Output = Result<(), Error>> + 'a,
    {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(existing) = tasks.get(&path) {
            return (existing.clone(), false);
        }
        let shared: CookFuture<'a> = async move { make.await.map_err(Arc::new) }.boxed_local().shared();
        tasks.insert(path, shared.clone());
        (shared, true)
    }

    pub(crate) fn forget(&self, path: &str) {
        self.tasks.lock().unwrap().remove(path);
    }

    /// Drop every in-flight task, for the start of a fresh dispatcher pass
    /// (a restart, or the very first run).
    pub(crate) fn clear(&self) {
        self.tasks.lock().unwrap().clear();
    }
}
