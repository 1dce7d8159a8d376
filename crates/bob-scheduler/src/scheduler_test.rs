// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bob_digest::Digest;
use bob_error::Error;
use bob_exec::{ExecConfig, ExecContext};
use bob_identity::IdentityEngine;
use bob_state::{BuildState, StateStore};
use bob_step::{ArchiveHandle, AuditFacts, AuditWriter, Dependencies, Step, StepKind, VariantDigest};
use relative_path::RelativePathBuf;
use tempfile::TempDir;

use crate::{PackageGraph, Scheduler, SchedulerConfig, TaskOutcome};

struct Zero;
impl VariantDigest for Zero {
    fn compute(&self, _resolve: &dyn Fn(&Step) -> Digest) -> Digest {
        bob_digest::NULL_DIGEST
    }
}

fn make_step(kind: StepKind, package: &str, name: &str, deps: Vec<Arc<Step>>, script: &str) -> Arc<Step> {
    let top = match kind {
        StepKind::Checkout => "src",
        StepKind::Build => "build",
        StepKind::Package => "dist",
    };
    Arc::new(Step {
        kind,
        variant_id: bob_digest::NULL_DIGEST,
        workspace_path: RelativePathBuf::from(format!("{top}/{package}/{name}")),
        exec_path: RelativePathBuf::from(format!("{package}/{name}")),
        deps: Dependencies { arguments: deps, tools: BTreeMap::new(), sandbox: None },
        env: BTreeMap::new(),
        script: script.to_string(),
        is_deterministic: true,
        is_relocatable: true,
        has_net_access: false,
        sandbox_mounts: Vec::new(),
        scm_list: Vec::new(),
        package_name: package.to_string(),
        package_stack: vec![package.to_string()],
        digest: Arc::new(Zero),
    })
}

#[derive(Default)]
struct FakeArchive;

#[async_trait]
impl ArchiveHandle for FakeArchive {
    fn want_download(&self) -> bool {
        false
    }

    fn want_upload(&self) -> bool {
        false
    }

    fn can_download_local(&self) -> bool {
        false
    }

    fn can_upload_local(&self) -> bool {
        false
    }

    async fn download_package(&self, _step: &Step, _build_id: Digest, _audit_path: &std::path::Path, _workspace: &std::path::Path) -> bool {
        false
    }

    async fn upload_package(&self, _step: &Step, _build_id: Digest, _audit_path: &std::path::Path, _workspace: &std::path::Path) {}

    async fn download_local_live_build_id(&self, _step: &Step, _live_id: &[u8]) -> Option<Digest> {
        None
    }

    async fn upload_local_live_build_id(&self, _step: &Step, _live_id: &[u8], _real_id: Digest) {}
}

struct FakeAudit;

impl AuditWriter for FakeAudit {
    fn write(&self, _facts: AuditFacts<'_>, workspace_parent: &std::path::Path) -> std::io::Result<PathBuf> {
        let path = workspace_parent.join("audit.json.gz");
        std::fs::write(&path, b"{}")?;
        Ok(path)
    }
}

/// Maps a package name to its checkout step, for the tests that need one.
#[derive(Default)]
struct FakeGraph {
    checkouts: HashMap<String, Arc<Step>>,
}

impl PackageGraph for FakeGraph {
    fn checkout_step_of(&self, step: &Step) -> Option<Arc<Step>> {
        self.checkouts.get(&step.package_name).cloned()
    }
}

struct Fixture {
    _tmp: TempDir,
    root: PathBuf,
    state: Arc<StateStore>,
    archive: Arc<FakeArchive>,
    audit: Arc<dyn AuditWriter>,
    config: ExecConfig,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let state = Arc::new(StateStore::open(&root).unwrap());
        Self {
            _tmp: tmp,
            root,
            state,
            archive: Arc::new(FakeArchive),
            audit: Arc::new(FakeAudit),
            config: ExecConfig { env_whitelist: vec!["PATH".to_string()], ..ExecConfig::default() },
        }
    }

    fn identity(&self) -> IdentityEngine {
        IdentityEngine::new(self.state.clone(), self.archive.clone() as Arc<dyn ArchiveHandle>)
    }

    fn ctx<'a>(&'a self, identity: &'a IdentityEngine) -> ExecContext<'a> {
        ExecContext {
            state: self.state.as_ref(),
            identity,
            archive: self.archive.clone() as Arc<dyn ArchiveHandle>,
            audit: self.audit.clone(),
            project_root: &self.root,
            config: &self.config,
        }
    }

    fn path(&self, step: &Step) -> PathBuf {
        self.root.join(step.workspace_path.as_str())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cooks_checkout_build_package_chain_in_order() {
    let fx = Fixture::new();
    let identity = fx.identity();
    let ctx = fx.ctx(&identity);

    let checkout = make_step(StepKind::Checkout, "app", "co", Vec::new(), "mkdir -p src && echo x >> src/log.txt");
    let build = make_step(StepKind::Build, "app", "build", vec![Arc::clone(&checkout)], "echo x >> log.txt");
    let package = make_step(
        StepKind::Package,
        "app",
        "pkg",
        vec![Arc::clone(&build)],
        "mkdir -p out && echo x >> out/log.txt",
    );

    let mut graph = FakeGraph::default();
    graph.checkouts.insert("app".to_string(), Arc::clone(&checkout));

    let scheduler = Scheduler::new(ctx, &graph, SchedulerConfig::default(), &fx.state).unwrap();
    let outcome = scheduler.cook(&[Arc::clone(&package)], false).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);

    assert!(fx.path(&checkout).join("src").join("log.txt").exists());
    assert!(fx.path(&build).join("log.txt").exists());
    assert!(fx.path(&package).join("out").join("log.txt").exists());

    let state = fx.state.build_state().unwrap().unwrap();
    assert_eq!(state.was_run.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_dependency_cooks_exactly_once() {
    let fx = Fixture::new();
    let identity = fx.identity();
    let ctx = fx.ctx(&identity);

    let checkout =
        make_step(StepKind::Checkout, "lib", "co", Vec::new(), "mkdir -p src && echo x >> src/log.txt");
    let build_a = make_step(StepKind::Build, "lib", "a", vec![Arc::clone(&checkout)], "echo a >> a.txt");
    let build_b = make_step(StepKind::Build, "lib", "b", vec![Arc::clone(&checkout)], "echo b >> b.txt");

    let mut graph = FakeGraph::default();
    graph.checkouts.insert("lib".to_string(), Arc::clone(&checkout));

    let config = SchedulerConfig { jobs: 4, ..SchedulerConfig::default() };
    let scheduler = Scheduler::new(ctx, &graph, config, &fx.state).unwrap();
    let outcome = scheduler.cook(&[build_a, build_b], false).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);

    let log = fx.path(&checkout).join("src").join("log.txt");
    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn no_deps_skips_cross_package_dependency() {
    let fx = Fixture::new();
    let identity = fx.identity();
    let ctx = fx.ctx(&identity);

    let tool = make_step(StepKind::Package, "toolpkg", "tool", Vec::new(), "mkdir -p out && echo x >> out/log.txt");
    let app = make_step(
        StepKind::Package,
        "app",
        "pkg",
        vec![Arc::clone(&tool)],
        "mkdir -p out && echo x >> out/log.txt",
    );

    let graph = FakeGraph::default();
    let config = SchedulerConfig { skip_deps: true, ..SchedulerConfig::default() };
    let scheduler = Scheduler::new(ctx, &graph, config, &fx.state).unwrap();
    let outcome = scheduler.cook(&[Arc::clone(&app)], false).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);

    assert!(fx.path(&app).join("out").join("log.txt").exists());
    assert!(!fx.path(&tool).join("out").join("log.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn keep_going_collects_every_independent_failure() {
    let fx = Fixture::new();
    let identity = fx.identity();
    let ctx = fx.ctx(&identity);

    let bad_a = make_step(StepKind::Build, "a", "bad", Vec::new(), "exit 1");
    let bad_b = make_step(StepKind::Build, "b", "bad", Vec::new(), "exit 1");

    let graph = FakeGraph::default();
    let config = SchedulerConfig { keep_going: true, ..SchedulerConfig::default() };
    let scheduler = Scheduler::new(ctx, &graph, config, &fx.state).unwrap();
    let err = scheduler.cook(&[bad_a, bad_b], false).await.unwrap_err();

    match err {
        Error::Multi(multi) => assert_eq!(multi.0.len(), 2),
        other => panic!("expected a collected multi-error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn resume_skips_step_recorded_as_already_run() {
    let fx = Fixture::new();

    let build = make_step(StepKind::Build, "app", "build", Vec::new(), "echo x >> log.txt");
    let mut state = BuildState::default();
    state.was_run.insert(build.workspace_path.as_str().to_string(), (build.variant_id, false));
    fx.state.set_build_state(&state).unwrap();

    let identity = fx.identity();
    let ctx = fx.ctx(&identity);
    let graph = FakeGraph::default();
    let scheduler = Scheduler::new(ctx, &graph, SchedulerConfig::default(), &fx.state).unwrap();
    let outcome = scheduler.cook(&[Arc::clone(&build)], false).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);

    assert!(!fx.path(&build).join("log.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn mispredicted_checkout_build_id_restarts_exactly_once() {
    let fx = Fixture::new();

    let checkout =
        make_step(StepKind::Checkout, "app", "co", Vec::new(), "mkdir -p src && echo x >> src/log.txt");

    let mut state = BuildState::default();
    state
        .predicted_src_build_ids
        .insert((checkout.workspace_path.as_str().to_string(), checkout.variant_id), (bob_digest::NULL_DIGEST, true));
    fx.state.set_build_state(&state).unwrap();

    let identity = fx.identity();
    let ctx = fx.ctx(&identity);
    let graph = FakeGraph::default();
    let scheduler = Scheduler::new(ctx, &graph, SchedulerConfig::default(), &fx.state).unwrap();
    let outcome = scheduler.cook(&[Arc::clone(&checkout)], false).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Restart);

    let log = fx.path(&checkout).join("src").join("log.txt");
    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 1);
}
