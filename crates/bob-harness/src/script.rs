// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bob_error::{BuildError, Error, Result};
use bob_step::{Step, StepKind};
use relative_path::RelativePath;

/// The verbosity thresholds the wrapper script and its own `-q`/`-v`
/// command-line flags are derived from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Info,
    Debug,
}

impl Verbosity {
    pub(crate) fn cli_flag(self) -> Option<&'static str> {
        match self {
            Verbosity::Quiet => Some("-q"),
            Verbosity::Normal => None,
            Verbosity::Info => Some("-v"),
            Verbosity::Debug => Some("-vv"),
        }
    }
}

/// Describes the sandbox to wrap the step's run in, if any. The root
/// filesystem is the sandbox step's own workspace; every dependency
/// workspace is bind-mounted at its `exec_path` on top of it.
pub struct SandboxPlan<'a> {
    pub namespace_sandbox_bin: &'a Path,
    pub root_fs: &'a Path,
    /// Absolute path to the current step's own workspace directory, bind
    /// mounted read-write so it can actually be written to.
    pub own_workspace_abs: &'a Path,
    pub debug: bool,
    /// Maps a dependency step to its absolute workspace directory.
    pub resolve_path: &'a dyn Fn(&Step) -> PathBuf,
}

/// Everything the composer needs to write the two run-time files for a
/// step: the wrapper (`<kind>.sh`) and the prolog+body (`script`).
pub struct RunRequest<'a> {
    pub step: &'a Step,
    /// Extra `PATH` entries contributed by tool dependencies, in order.
    pub extra_paths: &'a [String],
    /// `LD_LIBRARY_PATH` entries contributed by dependencies.
    pub library_paths: &'a [String],
    pub clean_workspace: bool,
    pub sandbox: Option<SandboxPlan<'a>>,
    pub env_whitelist: &'a [String],
    pub preserve_env: bool,
}

pub struct ComposedScript {
    pub wrapper: String,
    pub prolog_and_body: String,
    pub step_env: BTreeMap<String, String>,
}

const RUN_TEMPLATE: &str = r#"#!/bin/bash

on_exit()
{
     if [[ -n "$_sandbox" ]] ; then
          if [[ $_keep_sandbox = 0 ]] ; then
                rm -rf "$_sandbox"
          else
                echo "Keeping sandbox in $_sandbox" >&2
          fi
     fi
}

run()
{
    @@SANDBOX_CMD@@ "$@"
}

run_script()
{
    local ret=0 trace=""
    if [[ $_verbose -ge 3 ]] ; then trace="-x" ; fi

    echo "### START: `date`"
    run /bin/bash $trace -- ../script @@ARGS@@
    ret=$?
    echo "### END($ret): `date`"

    return $ret
}

# make permissions predictable
umask 0022

_clean=@@CLEAN@@
_keep_env=0
_verbose=1
_no_log=0
_sandbox=@@SANDBOX_SETUP@@
_keep_sandbox=0
_args=`getopt -o cinkqvE -- "$@"`
if [ $? != 0 ] ; then echo "Args parsing failed..." >&2 ; exit 1 ; fi
eval set -- "$_args"

_args=( )
while true ; do
    case "$1" in
        -c) _clean=1 ;;
        -i) _clean=0 ;;
        -n) _no_log=1 ;;
        -k) _keep_sandbox=1 ;;
        -q) : $(( _verbose-- )) ;;
        -v) : $(( _verbose++ )) ;;
        -E) _keep_env=1 ;;
        --) shift ; break ;;
        *) echo "Internal error!" ; exit 1 ;;
    esac
    _args+=("$1")
    shift
done

if [[ $# -gt 1 ]] ; then
    echo "Unexpected arguments!" >&2
    exit 1
fi

trap on_exit EXIT

case "${1:-run}" in
    run)
        if [[ $_clean = 1 ]] ; then
            rm -rf "${0%/*}/workspace"
            mkdir -p "${0%/*}/workspace"
        fi
        if [[ $_keep_env = 1 ]] ; then
            exec "$0" "${_args[@]}" __run
        else
            exec /usr/bin/env -i @@WHITELIST@@ "$0" "${_args[@]}" __run
        fi
        ;;
    __run)
        cd "${0%/*}/workspace"
        if [[ $_no_log = 0 ]] ; then
            case "$_verbose" in
                0)
                    run_script >> ../log.txt 2>&1
                    ;;
                1)
                    set -o pipefail
                    {
                        {
                            run_script | tee -a ../log.txt
                        } 3>&1 1>&2- 2>&3- | tee -a ../log.txt
                    } 1>&2- 2>/dev/null
                    ;;
                *)
                    set -o pipefail
                    {
                        {
                            run_script | tee -a ../log.txt
                        } 3>&1 1>&2- 2>&3- | tee -a ../log.txt
                    } 3>&1 1>&2- 2>&3-
                    ;;
            esac
        else
            case "$_verbose" in
                0)
                    run_script 2>&1 > /dev/null
                    ;;
                1)
                    run_script > /dev/null
                    ;;
                *)
                    run_script
                    ;;
            esac
        fi
        ;;
    shell)
        if [[ $_keep_env = 1 ]] ; then
            exec /usr/bin/env @@ENV@@ "$0" "${_args[@]}" __shell
        else
            exec /usr/bin/env -i @@WHITELIST@@ @@ENV@@ "$0" "${_args[@]}" __shell
        fi
        ;;
    __shell)
        cd "${0%/*}/workspace"
        rm -f ../audit.json.gz
        if [[ $_keep_env = 1 ]] ; then
            run /bin/bash -s @@ARGS@@
        else
            run /bin/bash --norc -s @@ARGS@@
        fi
        ;;
    *)
        echo "Unknown command" ; exit 1 ;;
esac
"#;

const PROLOG: &str = r#"# Error handling
bob_handle_error()
{
    set +x
    echo "\x1b[31;1mStep failed with return status $1; Command:\x1b[0;31m ${BASH_COMMAND}\x1b[0m"
    echo "Call stack (most recent call first)"
    i=0
    while caller $i >/dev/null ; do
            j=${BASH_LINENO[$i]}
            while [[ $j -ge 0 && -z ${_BOB_SOURCES[$j]:+true} ]] ; do
                    : $(( j-- ))
            done
            echo "    #$i: ${_BOB_SOURCES[$j]}, line $(( BASH_LINENO[$i] - j )), in ${FUNCNAME[$((i+1))]}"
            : $(( i++ ))
    done

    exit $1
}
declare -A _BOB_SOURCES=( [0]="Bob prolog" )
trap 'bob_handle_error $? >&2' ERR
trap 'for i in "${_BOB_TMP_CLEANUP[@]-}" ; do rm -f "$i" ; done' EXIT
set -o errtrace -o nounset -o pipefail

# Special Bob array variables:
"#;

fn quote(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

fn step_env(req: &RunRequest) -> BTreeMap<String, String> {
    let mut env = req.step.env.clone();
    let mut path_entries: Vec<String> = req.extra_paths.to_vec();
    if req.sandbox.is_none() {
        if let Ok(existing) = std::env::var("PATH") {
            path_entries.push(existing);
        }
    }
    env.insert("PATH".to_string(), path_entries.join(":"));
    env.insert("LD_LIBRARY_PATH".to_string(), req.library_paths.join(":"));
    env.insert("BOB_CWD".to_string(), req.step.exec_path.as_str().to_string());
    env
}

/// Walk the chain of "first argument" predecessors of `step` within the
/// same package, so that a step can see its own previous steps' outputs
/// inside the sandbox.
fn first_argument_chain(step: &Step) -> Vec<std::sync::Arc<Step>> {
    let mut chain = Vec::new();
    let mut current = step.deps.arguments.first().cloned();
    while let Some(s) = current {
        let next = s.deps.arguments.first().cloned();
        chain.push(s);
        current = next;
    }
    chain
}

fn compose_sandbox(req: &RunRequest, plan: &SandboxPlan<'_>) -> Result<(String, String)> {
    let mut mounts = vec!["declare -a mounts=( )".to_string()];

    let mut children: Vec<_> = std::fs::read_dir(plan.root_fs)
        .map_err(|err| {
            Error::Build(BuildError::new(format!(
                "failed to list sandbox root '{}': {err}",
                plan.root_fs.display()
            )))
        })?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| Error::Build(BuildError::new(format!("failed to list sandbox root: {err}"))))?;
    children.sort_by_key(|entry| entry.file_name());
    for entry in children {
        let name = entry.file_name().to_string_lossy().into_owned();
        mounts.push(format!(
            "mounts+=( -M {} -m /{} )",
            quote(&plan.root_fs.join(&name).to_string_lossy()),
            quote(&name)
        ));
    }

    for mount in &req.step.sandbox_mounts {
        if mount.no_local {
            continue;
        }
        let mut line = format!("-M {}", mount.host_path.as_str());
        if mount.read_write {
            line.push_str(&format!(" -w {}", mount.sandbox_path.as_str()));
        } else if mount.host_path.as_str() != mount.sandbox_path.as_str() {
            line.push_str(&format!(" -m {}", mount.sandbox_path.as_str()));
        }
        let line = format!("mounts+=( {line} )");
        if mount.no_fail {
            mounts.push(format!(
                "if [[ -e {} ]] ; then {} ; fi",
                mount.host_path.as_str(),
                line
            ));
        } else {
            mounts.push(line);
        }
    }

    let own_parent = plan.own_workspace_abs.parent().unwrap_or(plan.own_workspace_abs);
    let exec_parent = req
        .step
        .exec_path
        .parent()
        .unwrap_or_else(|| RelativePath::new(""));
    mounts.push(format!(
        "mounts+=( -M {} -w {} )",
        quote(&own_parent.to_string_lossy()),
        quote(exec_parent.as_str())
    ));

    let mut add_dep = |dep: &Step| {
        mounts.push(format!(
            "mounts+=( -M {} -m {} )",
            quote(&(plan.resolve_path)(dep).to_string_lossy()),
            quote(dep.exec_path.as_str())
        ));
    };
    for dep in req.step.deps.all() {
        add_dep(&dep);
    }
    for dep in first_argument_chain(req.step) {
        add_dep(&dep);
    }

    let mut sandbox = vec![quote(&plan.namespace_sandbox_bin.to_string_lossy())];
    if plan.debug {
        sandbox.push("-D".to_string());
    }
    sandbox.push("-S".to_string());
    sandbox.push("\"$_sandbox\"".to_string());
    sandbox.push("-W".to_string());
    sandbox.push(quote(req.step.exec_path.as_str()));
    sandbox.push("-H".to_string());
    sandbox.push("bob".to_string());
    sandbox.push("-d".to_string());
    sandbox.push("/tmp".to_string());
    if !req.step.has_net_access {
        sandbox.push("-n".to_string());
    }
    sandbox.push("\"${mounts[@]}\"".to_string());
    sandbox.push("--".to_string());

    let sandbox_cmd = mounts
        .into_iter()
        .chain(std::iter::once(sandbox.join(" ")))
        .collect::<Vec<_>>()
        .join("\n    ");

    Ok((sandbox_cmd, "\"$(mktemp -d)\"".to_string()))
}

/// Compose the wrapper (`<kind>.sh`) and the prolog+body (`script`) for a
/// step's run, without writing anything to disk.
pub fn compose_scripts(req: &RunRequest) -> Result<ComposedScript> {
    let env = step_env(req);

    let (sandbox_cmd, sandbox_setup) = match &req.sandbox {
        Some(plan) => compose_sandbox(req, plan)?,
        None => (String::new(), String::new()),
    };

    let whitelist = req
        .env_whitelist
        .iter()
        .map(|key| format!("${{{0}+{0}=\"${0}\"}}", key))
        .collect::<Vec<_>>()
        .join(" ");

    let mut sorted_env: Vec<_> = env.iter().collect();
    sorted_env.sort_by_key(|(k, _)| k.to_string());
    let env_assignments = sorted_env
        .iter()
        .map(|(k, v)| format!("{k}={}", quote(v)))
        .collect::<Vec<_>>()
        .join(" ");

    let args = req
        .step
        .deps
        .arguments
        .iter()
        .map(|a| quote(a.exec_path.as_str()))
        .collect::<Vec<_>>()
        .join(" ");

    let wrapper = RUN_TEMPLATE
        .replace("@@ENV@@", &env_assignments)
        .replace("@@WHITELIST@@", &whitelist)
        .replace("@@ARGS@@", &args)
        .replace("@@SANDBOX_CMD@@", &sandbox_cmd)
        .replace("@@SANDBOX_SETUP@@", &sandbox_setup)
        .replace("@@CLEAN@@", if req.clean_workspace { "1" } else { "0" });

    let mut body = String::from(PROLOG);
    body.push_str(&format!(
        "declare -A BOB_ALL_PATHS=( {} )\n",
        dep_path_decl(req.step.deps.all().iter().map(|s| s.as_ref()))
    ));
    body.push_str(&format!(
        "declare -A BOB_DEP_PATHS=( {} )\n",
        dep_path_decl(req.step.deps.arguments.iter().map(|s| s.as_ref()))
    ));
    body.push_str(&format!(
        "declare -A BOB_TOOL_PATHS=( {} )\n",
        tool_path_decl(&req.step.deps.tools)
    ));
    body.push('\n');
    body.push_str("# Environment:\n");
    for (k, v) in &sorted_env {
        body.push_str(&format!("export {k}={}\n", quote(v)));
    }
    body.push_str("declare -p > ../env\n\n");
    body.push_str("# BEGIN BUILD SCRIPT\n");
    body.push_str(&req.step.script);
    body.push_str("\n# END BUILD SCRIPT\n");

    Ok(ComposedScript {
        wrapper,
        prolog_and_body: body,
        step_env: env,
    })
}

fn dep_path_decl<'a>(steps: impl Iterator<Item = &'a Step>) -> String {
    let mut entries: Vec<_> = steps
        .map(|s| format!("[{}]={}", quote(&s.package_name), quote(s.exec_path.as_str())))
        .collect();
    entries.sort();
    entries.join(" ")
}

fn tool_path_decl(tools: &BTreeMap<String, std::sync::Arc<Step>>) -> String {
    let mut entries: Vec<_> = tools
        .iter()
        .map(|(name, tool)| format!("[{}]={}", quote(name), quote(tool.exec_path.as_str())))
        .collect();
    entries.sort();
    entries.join(" ")
}

/// Write the composed wrapper and body next to `workspace_path`
/// (`../<kind>.sh` and `../script`), making the wrapper executable on unix.
pub fn write_scripts(
    workspace_path: &Path,
    kind: StepKind,
    composed: &ComposedScript,
) -> Result<PathBuf> {
    let parent = workspace_path.parent().ok_or_else(|| {
        Error::Build(BuildError::new(format!(
            "workspace path '{}' has no parent",
            workspace_path.display()
        )))
    })?;
    let wrapper_path = parent.join(format!("{}.sh", kind.verb()));
    std::fs::write(&wrapper_path, &composed.wrapper).map_err(|err| {
        Error::Build(BuildError::new(format!(
            "failed to write '{}': {err}",
            wrapper_path.display()
        )))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&wrapper_path)
            .map_err(|err| Error::Build(BuildError::new(format!("failed to stat wrapper: {err}"))))?
            .permissions();
        perms.set_mode(0o775);
        std::fs::set_permissions(&wrapper_path, perms)
            .map_err(|err| Error::Build(BuildError::new(format!("failed to chmod wrapper: {err}"))))?;
    }

    let script_path = parent.join("script");
    std::fs::write(&script_path, &composed.prolog_and_body).map_err(|err| {
        Error::Build(BuildError::new(format!(
            "failed to write '{}': {err}",
            script_path.display()
        )))
    })?;

    Ok(wrapper_path)
}
