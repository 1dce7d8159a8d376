// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::path::Path;

use bob_error::{BuildError, Error, Result};

use crate::script::Verbosity;

/// How a step's stdout/stderr are handled while it runs. Buffered mode is
/// required whenever more than one step may be running concurrently, since
/// interleaved inherited terminal output from parallel jobs is unreadable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StdioMode {
    /// Inherit the caller's stdio -- fine for single-job, interactive runs.
    Regular,
    /// Capture combined stdout+stderr into a temp file; surfaced through
    /// `Outcome::buffered_output` only if the run failed for a reason other
    /// than user interrupt.
    Buffered,
}

pub struct RunOutcome {
    pub exit_code: i32,
    pub interrupted: bool,
    pub buffered_output: Option<String>,
}

/// Invoke `/bin/bash <wrapper> __run [flags]` with `cwd` set to the step's
/// workspace and `env` as the (possibly whitelist-filtered) runtime
/// environment; `step_env` is overlaid on top, exactly mirroring the
/// original's `runEnv.update(stepEnv)`.
pub async fn run_shell(
    wrapper_path: &Path,
    workspace_path: &Path,
    preserve_env: bool,
    env_whitelist: &[String],
    step_env: &HashMap<String, String>,
    verbosity: Verbosity,
    no_log_file: bool,
    stdio: StdioMode,
) -> Result<RunOutcome> {
    let mut env: HashMap<String, String> = if preserve_env {
        std::env::vars().collect()
    } else {
        std::env::vars()
            .filter(|(key, _)| env_whitelist.iter().any(|w| w == key))
            .collect()
    };
    env.extend(step_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let mut args = vec!["__run".to_string()];
    if let Some(flag) = verbosity.cli_flag() {
        args.push(flag.to_string());
    }
    if no_log_file {
        args.push("-n".to_string());
    }

    tracing::debug!(wrapper = %wrapper_path.display(), ?stdio, "running step script");

    let mut cmd = tokio::process::Command::new("/bin/bash");
    cmd.arg(wrapper_path).args(&args).current_dir(workspace_path);
    cmd.env_clear();
    cmd.envs(&env);

    let (status, buffered_output) = match stdio {
        StdioMode::Regular => {
            let status = cmd
                .status()
                .await
                .map_err(|err| exec_error(wrapper_path, err))?;
            (status, None)
        }
        StdioMode::Buffered => {
            let mut tmp = tempfile::tempfile()
                .map_err(|err| Error::Build(BuildError::new(format!("cannot create temp file: {err}"))))?;
            let tmp_clone = tmp
                .try_clone()
                .map_err(|err| Error::Build(BuildError::new(format!("cannot duplicate temp file: {err}"))))?;
            cmd.stdin(std::process::Stdio::null());
            cmd.stdout(std::process::Stdio::from(tmp_clone.try_clone().map_err(|err| {
                Error::Build(BuildError::new(format!("cannot duplicate temp file: {err}")))
            })?));
            cmd.stderr(std::process::Stdio::from(tmp_clone));

            let status = cmd
                .status()
                .await
                .map_err(|err| exec_error(wrapper_path, err))?;

            let output = if !status.success() && !was_sigint(status) {
                use std::io::{Read, Seek, SeekFrom};
                let mut buf = String::new();
                let _ = tmp.seek(SeekFrom::Start(0));
                let _ = tmp.read_to_string(&mut buf);
                Some(buf.trim().to_string())
            } else {
                None
            };
            (status, output)
        }
    };

    let interrupted = was_sigint(status);
    let exit_code = status.code().unwrap_or(-1);

    if interrupted {
        return Err(Error::Build(BuildError::with_help(
            format!("User aborted while running {}", wrapper_path.display()),
            "Run again with '--resume' to skip already built packages.",
        )));
    }
    if !status.success() {
        let mut message = format!("Build script {} returned with {exit_code}", wrapper_path.display());
        if let Some(output) = &buffered_output {
            message.push_str(&format!("\n{output}"));
        }
        return Err(Error::Build(BuildError::with_help(
            message,
            "You may resume at this point with '--resume' after fixing the error.",
        )));
    }

    Ok(RunOutcome {
        exit_code,
        interrupted,
        buffered_output,
    })
}

fn exec_error(wrapper_path: &Path, err: std::io::Error) -> Error {
    Error::Build(BuildError::new(format!(
        "Cannot execute build script {}: {err}",
        wrapper_path.display()
    )))
}

#[cfg(unix)]
fn was_sigint(status: std::process::ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGINT)
}

#[cfg(not(unix))]
fn was_sigint(_status: std::process::ExitStatus) -> bool {
    false
}
