// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use relative_path::RelativePathBuf;
use tempfile::TempDir;

use crate::{
    ArchiveHandle, AuditFacts, AuditWriter, BuildCore, BuildRequest, Dependencies, Digest, PackageGraph, Step,
    StepKind, TaskOutcome, VariantDigest,
};

struct Zero;
impl VariantDigest for Zero {
    fn compute(&self, _resolve: &dyn Fn(&Step) -> Digest) -> Digest {
        crate::NULL_DIGEST
    }
}

fn make_step(kind: StepKind, package: &str, script: &str) -> Arc<Step> {
    let top = match kind {
        StepKind::Checkout => "src",
        StepKind::Build => "build",
        StepKind::Package => "dist",
    };
    Arc::new(Step {
        kind,
        variant_id: crate::NULL_DIGEST,
        workspace_path: RelativePathBuf::from(format!("{top}/{package}")),
        exec_path: RelativePathBuf::from(package.to_string()),
        deps: Dependencies { arguments: Vec::new(), tools: BTreeMap::new(), sandbox: None },
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

struct NoArchive;

#[async_trait]
impl ArchiveHandle for NoArchive {
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
    async fn download_package(&self, _: &Step, _: Digest, _: &Path, _: &Path) -> bool {
        false
    }
    async fn upload_package(&self, _: &Step, _: Digest, _: &Path, _: &Path) {}
    async fn download_local_live_build_id(&self, _: &Step, _: &[u8]) -> Option<Digest> {
        None
    }
    async fn upload_local_live_build_id(&self, _: &Step, _: &[u8], _: Digest) {}
}

struct NoAudit;
impl AuditWriter for NoAudit {
    fn write(&self, _facts: AuditFacts<'_>, workspace_parent: &Path) -> std::io::Result<std::path::PathBuf> {
        let path = workspace_parent.join("audit.json.gz");
        std::fs::write(&path, b"{}")?;
        Ok(path)
    }
}

#[derive(Default)]
struct NoDeps;
impl PackageGraph for NoDeps {
    fn checkout_step_of(&self, _step: &Step) -> Option<Arc<Step>> {
        None
    }
}

/// Exercises the facade end to end: a loaded (default) config wired into
/// `ExecConfig`/`SchedulerConfig`, a single build step cooked through
/// `cook`, with no checkout or package step in play.
#[tokio::test(flavor = "multi_thread")]
async fn cook_runs_a_single_step_through_the_facade() {
    let tmp = TempDir::new().unwrap();
    let core = BuildCore::from_config(Arc::new(crate::Config::default()));

    let step = make_step(StepKind::Build, "app", "echo ok >> out.txt");

    let request = BuildRequest {
        project_root: tmp.path(),
        roots: vec![Arc::clone(&step)],
        graph: &NoDeps,
        archive: Arc::new(NoArchive),
        audit: Arc::new(NoAudit),
        exec: core.exec_config(),
        scheduler: core.scheduler_config(None, false, false),
    };

    let outcome = crate::cook(request).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);

    let out = tmp.path().join("build/app/out.txt");
    assert!(out.exists());
}

#[test]
fn scheduler_config_overrides_default_job_count() {
    let mut config = crate::Config::default();
    config.jobs.default_count = 1;
    let core = BuildCore::from_config(Arc::new(config));

    assert_eq!(core.scheduler_config(None, false, false).jobs, 1);
    assert_eq!(core.scheduler_config(Some(8), false, false).jobs, 8);
}
