// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use bob_error::{BuildError, Error, Result};

/// Move a conflicting subtree out of the way before a checkout overwrites
/// it, into `<attic_root>/<local-timestamp>_<basename>`. The timestamp is
/// wall-clock local time, not UTC, matching the original tool's unqualified
/// `datetime.now()`.
pub fn atticize(path: &Path, attic_root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(attic_root).map_err(|err| {
        Error::Build(BuildError::new(format!(
            "failed to create attic directory '{}': {err}",
            attic_root.display()
        )))
    })?;

    let basename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("unknown");
    let timestamp = chrono::Local::now().to_rfc3339();
    let dest = attic_root.join(format!("{timestamp}_{basename}"));

    std::fs::rename(path, &dest).map_err(|err| {
        Error::Build(BuildError::new(format!(
            "failed to atticize '{}' to '{}': {err}",
            path.display(),
            dest.display()
        )))
    })?;

    Ok(dest)
}
