// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use bob_error::Result;
use bob_step::Step;

fn relative_to(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from_dir.components().collect();
    let to: Vec<_> = to.components().collect();

    let shared = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut result = PathBuf::new();
    for _ in shared..from.len() {
        result.push("..");
    }
    for component in &to[shared..] {
        result.push(component.as_os_str());
    }
    result
}

#[cfg(unix)]
fn symlink(link_dir: &Path, target_abs: &Path, link_path: &Path) -> Result<()> {
    use bob_error::{BuildError, Error};

    let rel_target = relative_to(link_dir, target_abs);
    std::os::unix::fs::symlink(&rel_target, link_path).map_err(|err| {
        Error::Build(BuildError::new(format!(
            "failed to link '{}' -> '{}': {err}",
            link_path.display(),
            rel_target.display()
        )))
    })
}

/// Rebuild `deps_dir` (normally `workspace/../deps`) from scratch with
/// path-relative symlinks: `sandbox` to the sandbox step, `tools/<name>` to
/// each named tool step, and `args/NN-<pkgname>` to each argument step in
/// declared order. `resolve_path` maps a dependency step to its absolute
/// workspace directory; POSIX-only, a no-op everywhere else.
#[cfg(unix)]
pub fn link_dependencies(
    step: &Step,
    deps_dir: &Path,
    resolve_path: impl Fn(&Step) -> PathBuf,
) -> Result<()> {
    crate::dir::remove_path(deps_dir)?;
    std::fs::create_dir_all(deps_dir).map_err(|err| {
        bob_error::Error::Build(bob_error::BuildError::new(format!(
            "failed to create '{}': {err}",
            deps_dir.display()
        )))
    })?;

    if let Some(sandbox) = &step.deps.sandbox {
        symlink(deps_dir, &resolve_path(sandbox), &deps_dir.join("sandbox"))?;
    }

    if !step.deps.tools.is_empty() {
        let tools_dir = deps_dir.join("tools");
        std::fs::create_dir_all(&tools_dir).map_err(|err| {
            bob_error::Error::Build(bob_error::BuildError::new(format!(
                "failed to create '{}': {err}",
                tools_dir.display()
            )))
        })?;
        for (name, tool) in &step.deps.tools {
            symlink(&tools_dir, &resolve_path(tool), &tools_dir.join(name))?;
        }
    }

    if !step.deps.arguments.is_empty() {
        let args_dir = deps_dir.join("args");
        std::fs::create_dir_all(&args_dir).map_err(|err| {
            bob_error::Error::Build(bob_error::BuildError::new(format!(
                "failed to create '{}': {err}",
                args_dir.display()
            )))
        })?;
        for (index, arg) in step.deps.arguments.iter().enumerate() {
            let link_name = format!("{:02}-{}", index + 1, arg.package_name);
            symlink(&args_dir, &resolve_path(arg), &args_dir.join(link_name))?;
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn link_dependencies(
    _step: &Step,
    _deps_dir: &Path,
    _resolve_path: impl Fn(&Step) -> PathBuf,
) -> Result<()> {
    Ok(())
}
