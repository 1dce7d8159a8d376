// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use bob_digest::Digest;
use bob_error::{BuildError, Error, Result};
use bob_step::{AuditFacts, Step};

use crate::context::ExecContext;
use crate::error::infra;

/// Render and persist the audit record for a step that just finished (or
/// whose result was re-checked and found unchanged). A checkout's
/// build-id is its own result hash; every other kind's build-id comes from
/// the identity engine.
pub(crate) fn generate_audit(
    ctx: &ExecContext<'_>,
    step: &Step,
    result_hash: Digest,
    executed: bool,
) -> Result<PathBuf> {
    let build_id = if step.is_checkout() {
        result_hash
    } else {
        ctx.identity.build_id(step).map_err(infra)?
    };

    let facts = AuditFacts {
        step,
        variant_id: step.variant_id,
        build_id,
        result_hash,
        executed,
    };

    let parent = ctx.workspace_parent(step);
    ctx.audit
        .write(facts, &parent)
        .map_err(|err| Error::Build(BuildError::new(format!("failed to write audit record: {err}"))))
}
