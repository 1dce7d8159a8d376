// Copyright (c) Contributors to the bob project.
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy used across the execution core.
//!
//! [`Cancel`] and [`Restart`] are deliberately *not* part of [`Error`]: they
//! are internal control signals, not user-facing failures, and are carried
//! through the scheduler as a task outcome rather than as an error variant
//! (see `bob_scheduler::TaskOutcome`).

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// An expected failure: a script returned non-zero, a workspace collided
/// with existing content, an archive transfer failed, or a hook rejected
/// the build. Carries the package stack that was active when it fired and
/// an optional hint shown to the user (typically "run again with --resume").
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct BuildError {
    message: String,
    stack: Vec<String>,
    help_text: Option<String>,
}

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            help_text: None,
        }
    }

    pub fn with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            help_text: Some(help.into()),
        }
    }

    /// Record the package stack that was active when this error occurred.
    /// Mirrors the original's `BuildError.setStack`, invoked once at the
    /// task boundary that first observes the error.
    pub fn set_stack(&mut self, stack: Vec<String>) {
        self.stack = stack;
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn help(&self) -> Option<&str> {
        self.help_text.as_deref()
    }
}

/// Malformed recipe input. The core never constructs this itself -- it is
/// surfaced here only so the collaborator that does (recipe parsing, out of
/// scope for this crate) can report through the same `Error` type.
#[derive(Debug, Error, Diagnostic)]
#[error("{0}")]
pub struct ParseError(pub String);

/// An infrastructure failure: state-store corruption, an unreadable
/// database, or any other condition the core cannot recover from. Errors
/// during persistent-state writes are always reported as this variant; the
/// run terminates rather than risk an inconsistent store.
#[derive(Debug, Error, Diagnostic)]
#[error("{0}")]
pub struct BobError(pub String);

/// Aggregates more than one [`Error`] collected during a `--keep-going` run.
#[derive(Debug, Error, Diagnostic)]
#[error("{} errors occurred during the build", .0.len())]
pub struct MultiBobError(pub Vec<Error>);

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Bob(#[from] BobError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Multi(#[from] MultiBobError),
}

impl Error {
    /// Collapse a list of collected errors the way the scheduler's outer
    /// loop does at the end of a `--keep-going` run: the sole error if there
    /// was only one, otherwise a [`MultiBobError`].
    pub fn from_many(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multi(MultiBobError(errors))),
        }
    }
}
