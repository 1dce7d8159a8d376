// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use async_trait::async_trait;
use bob_digest::Digest;

use crate::Step;

/// The capability surface of the remote artifact archive. The archive
/// itself -- how artifacts are stored, transported, or authenticated -- is
/// entirely out of scope; the core only ever calls through this trait.
#[async_trait]
pub trait ArchiveHandle: Send + Sync {
    /// Whether downloads are currently permitted (mirrors the CLI's
    /// `--download` mode, resolved by the caller before the build starts).
    fn want_download(&self) -> bool;

    /// Whether uploads are currently permitted.
    fn want_upload(&self) -> bool;

    /// Whether this archive can translate a live-build-id to a real
    /// build-id without a network round trip of the whole artifact.
    fn can_download_local(&self) -> bool;

    /// Whether this archive accepts a local live-build-id mapping upload.
    fn can_upload_local(&self) -> bool;

    /// Attempt to download a package step's artifact and its audit record
    /// into `workspace`. Returns `true` if the download succeeded.
    async fn download_package(
        &self,
        step: &Step,
        build_id: Digest,
        audit_path: &Path,
        workspace: &Path,
    ) -> bool;

    /// Upload a package step's artifact and audit record.
    async fn upload_package(&self, step: &Step, build_id: Digest, audit_path: &Path, workspace: &Path);

    /// Translate a live-build-id into a real build-id, if the archive has
    /// seen this live-id before.
    async fn download_local_live_build_id(&self, step: &Step, live_id: &[u8]) -> Option<Digest>;

    /// Record the mapping from a live-build-id to the real build-id that
    /// resulted from actually performing the checkout.
    async fn upload_local_live_build_id(&self, step: &Step, live_id: &[u8], real_id: Digest);
}

/// An archive that never permits downloads or uploads and always declines
/// local translation. Used when no remote archive has been configured.
pub struct DummyArchive;

#[async_trait]
impl ArchiveHandle for DummyArchive {
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
