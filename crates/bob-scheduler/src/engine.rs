// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bob_error::{BobError, Error, Result};
use bob_exec::ExecContext;
use bob_state::StateStore;
use bob_step::{Step, StepKind};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::SchedulerConfig;
use crate::dedup::TaskMap;
use crate::graph::PackageGraph;
use crate::outcome::TaskOutcome;
use crate::resume::ResumeTracker;

fn stamp_stack(mut err: Error, step: &Step) -> Error {
    if let Error::Build(build_err) = &mut err {
        build_err.set_stack(step.package_stack.clone());
    }
    err
}

/// Collapse the errors collected during one dispatcher pass the way the
/// original's `cook()` does after the pass completes: at most one owner of
/// each `Arc<Error>` should remain once every concurrent awaiter has
/// dropped its clone, so unwrapping should always succeed; fall back to a
/// re-rendered `BobError` rather than panic if it doesn't.
fn collapse_errors(errors: Vec<Arc<Error>>) -> Option<Error> {
    let owned = errors
        .into_iter()
        .map(|arc| Arc::try_unwrap(arc).unwrap_or_else(|arc| Error::Bob(BobError(arc.to_string()))))
        .collect();
    Error::from_many(owned)
}

/// Walks a step's dependencies depth-first, cooks each step exactly once
/// per run, bounds concurrency to `SchedulerConfig::jobs`, and restarts the
/// whole run from the same roots when a checkout step's live-build-id
/// prediction turns out to be wrong.
///
/// Unlike the original's `asyncio.Task`-per-step model, nothing here is
/// spawned onto the runtime: every cook request is just another future
/// joined into its parent's `join_all`, cooperatively scheduled the same
/// way `asyncio`'s single event loop interleaves tasks. This sidesteps
/// `Send`/`'static` entirely and is why `TaskMap` uses `LocalBoxFuture`.
/// Recursive calls clone an `Rc<Scheduler>` into each future rather than
/// borrowing `&self`, which is what lets those futures outlive the stack
/// frame that spawned them without a self-referential struct.
pub struct Scheduler<'a> {
    ctx: ExecContext<'a>,
    graph: &'a dyn PackageGraph,
    config: SchedulerConfig,
    resume: ResumeTracker,
    tasks: TaskMap<'a>,
    semaphore: Arc<Semaphore>,
    running: AtomicBool,
    restart: AtomicBool,
    errors: Mutex<Vec<Arc<Error>>>,
}

impl<'a> Scheduler<'a> {
    /// Build a scheduler for one `cook()` call (possibly spanning several
    /// mispredict-triggered restarts). Loads `--resume` state from `store`
    /// and seeds the identity engine's live-build-id cache from it.
    pub fn new(
        ctx: ExecContext<'a>,
        graph: &'a dyn PackageGraph,
        config: SchedulerConfig,
        store: &StateStore,
    ) -> Result<Rc<Self>> {
        let resume = ResumeTracker::load(store)?;
        resume.seed_identity(ctx.identity);
        let jobs = config.jobs.max(1);
        Ok(Rc::new(Self {
            ctx,
            graph,
            config,
            resume,
            tasks: TaskMap::new(),
            semaphore: Arc::new(Semaphore::new(jobs)),
            running: AtomicBool::new(true),
            restart: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
        }))
    }

    /// Cook every step in `roots` (and, unless `--no-deps` is set, their
    /// full dependency closure). Mirrors the original's `cook()`: retries
    /// from scratch on a mispredicted checkout build-id, and collapses any
    /// errors collected under `--keep-going` into a single `Error` once the
    /// pass is done.
    pub async fn cook(self: &Rc<Self>, roots: &[Arc<Step>], checkout_only: bool) -> Result<TaskOutcome> {
        let mut restarted = false;
        loop {
            self.running.store(true, Ordering::SeqCst);
            self.restart.store(false, Ordering::SeqCst);
            self.tasks.clear();
            self.errors.lock().unwrap().clear();

            self.clone().cook_steps(roots.to_vec(), None, checkout_only, 0).await;

            let errors = std::mem::take(&mut *self.errors.lock().unwrap());
            if let Some(err) = collapse_errors(errors) {
                return Err(err);
            }

            if self.restart.load(Ordering::SeqCst) {
                tracing::warn!("restarting build due to wrongly predicted sources");
                restarted = true;
                self.ctx.identity.reset_dist_build_ids();
                self.resume.clear_was_run();
                continue;
            }

            if !self.running.load(Ordering::SeqCst) {
                return Ok(TaskOutcome::Cancelled);
            }

            self.resume.save(self.ctx.state, self.ctx.identity)?;
            return Ok(if restarted { TaskOutcome::Restart } else { TaskOutcome::Done });
        }
    }

    /// Depth-first cook of `steps`, filtered by `--no-deps` (if `parent`
    /// names the package to stay within) and by `--resume`'s was-run map,
    /// then fanned out (bounded by the jobs semaphore) to `cook_task`.
    fn cook_steps(
        self: Rc<Self>,
        steps: Vec<Arc<Step>>,
        parent: Option<String>,
        checkout_only: bool,
        depth: u32,
    ) -> LocalBoxFuture<'a, ()> {
        async move {
            let steps: Vec<Arc<Step>> = match (&self.config.skip_deps, &parent) {
                (true, Some(pkg)) => steps.into_iter().filter(|s| self.graph.package_of(s) == pkg).collect(),
                _ => steps,
            };
            let steps: Vec<Arc<Step>> =
                steps.into_iter().filter(|s| !self.resume.was_already_run(s, checkout_only)).collect();
            if steps.is_empty() {
                return;
            }

            let tasks = steps.into_iter().map(|step| self.clone().cook_task(step, checkout_only, depth));
            futures::future::join_all(tasks).await;
        }
        .boxed_local()
    }

    /// Acquire a concurrency permit, join (or start) the shared cook task
    /// for `step`'s workspace, and -- only if this call started it --
    /// report its outcome: evict it from the dedup map on success, or
    /// collect the error and, unless `--keep-going`, cancel the run.
    fn cook_task(self: Rc<Self>, step: Arc<Step>, checkout_only: bool, depth: u32) -> LocalBoxFuture<'a, ()> {
        async move {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }

            let path = step.workspace_path.as_str().to_string();
            let body = self.clone().cook_step_body(Arc::clone(&step), checkout_only, depth);
            let (shared, is_new) = self.tasks.share(path.clone(), body);
            let result = shared.await;

            if !is_new {
                return;
            }
            match result {
                Ok(()) => self.tasks.forget(&path),
                Err(err) => {
                    if !self.config.keep_going {
                        self.running.store(false, Ordering::SeqCst);
                    }
                    self.errors.lock().unwrap().push(err);
                }
            }
        }
        .boxed_local()
    }

    /// Releases `permit` before awaiting `fut` and reacquires one from the
    /// same semaphore afterward. Mirrors `__yieldJobWhile`: without this, a
    /// step that recurses into its own dependencies while still holding its
    /// permit deadlocks as soon as the dependency chain's depth exceeds
    /// `jobs` (trivially true for the default `jobs=1`), since the child
    /// can never acquire the one permit its parent is sitting on.
    async fn yield_job_while<F, T>(&self, permit: OwnedSemaphorePermit, fut: F) -> (OwnedSemaphorePermit, T)
    where
        F: Future<Output = T>,
    {
        drop(permit);
        let result = fut.await;
        let permit = self.semaphore.clone().acquire_owned().await.expect("scheduler semaphore is never closed");
        (permit, result)
    }

    /// Cook exactly one step, assuming the semaphore permit it needs is
    /// still available. Mirrors `_cookStep`/`_cookCheckoutStep`/
    /// `_cookBuildStep`/`_cookPackageStep` folded together.
    fn cook_step_body(
        self: Rc<Self>,
        step: Arc<Step>,
        checkout_only: bool,
        depth: u32,
    ) -> LocalBoxFuture<'a, Result<()>> {
        async move {
            let permit = self.semaphore.clone().acquire_owned().await.expect("scheduler semaphore is never closed");
            if !self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            if self.resume.was_already_run(&step, checkout_only) {
                return Ok(());
            }

            let result = match step.kind {
                StepKind::Checkout => self.clone().cook_checkout(Arc::clone(&step), depth, permit).await,
                StepKind::Build => self.clone().cook_build(Arc::clone(&step), checkout_only, depth, permit).await,
                StepKind::Package => self.clone().cook_package(Arc::clone(&step), checkout_only, depth, permit).await,
            };
            result.map_err(|err| stamp_stack(err, &step))
        }
        .boxed_local()
    }

    async fn cook_checkout(self: Rc<Self>, step: Arc<Step>, depth: u32, permit: OwnedSemaphorePermit) -> Result<()> {
        // A checkout step's own dependencies (tools, sandbox) are always
        // fully built, never left at `--checkout-only`: the checkout script
        // may need to actually run them.
        let package = step.package_name.clone();
        let deps = self.clone().cook_steps(step.deps.all(), Some(package), false, depth + 1);
        let (permit, ()) = self.yield_job_while(permit, deps).await;
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let outcome = bob_exec::cook_checkout_step(&self.ctx, &step).await?;
        drop(permit);
        self.resume.set_already_run(&step, true, false);
        if outcome.restart {
            self.restart.store(true, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn cook_build(
        self: Rc<Self>,
        step: Arc<Step>,
        checkout_only: bool,
        depth: u32,
        permit: OwnedSemaphorePermit,
    ) -> Result<()> {
        let package = step.package_name.clone();
        let deps = self.clone().cook_steps(step.deps.all(), Some(package), checkout_only, depth + 1);
        let (permit, ()) = self.yield_job_while(permit, deps).await;
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        bob_exec::cook_build_step(&self.ctx, &step).await?;
        drop(permit);
        self.resume.set_already_run(&step, false, checkout_only);
        Ok(())
    }

    async fn cook_package(
        self: Rc<Self>,
        step: Arc<Step>,
        checkout_only: bool,
        depth: u32,
        permit: OwnedSemaphorePermit,
    ) -> Result<()> {
        let checkout_step = self.graph.checkout_step_of(&step);
        let mut deps = step.deps.all();
        if let Some(checkout_step) = &checkout_step {
            deps.push(Arc::clone(checkout_step));
        }
        let package = step.package_name.clone();
        let deps = self.clone().cook_steps(deps, Some(package), checkout_only, depth + 1);
        let (permit, ()) = self.yield_job_while(permit, deps).await;
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        bob_exec::cook_package_step(&self.ctx, &step, checkout_step.as_deref(), depth).await?;
        drop(permit);
        self.resume.set_already_run(&step, false, checkout_only);
        Ok(())
    }
}
