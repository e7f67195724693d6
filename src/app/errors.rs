// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const ILLEGAL_STATE: &str = "illegal_state";
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const GATEWAY_TIMEOUT: &str = "gateway_timeout";
    pub const CONCURRENT_MODIFICATION: &str = "concurrent_modification";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionErrorKind {
    /// Operation is not legal for the application's current state.
    InvalidTransition,
    /// Administrative operation attempted in a non-terminal state.
    IllegalState,
    /// The gateway rejected or failed the submission.
    Submission,
    /// The gateway did not acknowledge within the configured bound.
    GatewayTimeout,
    /// Optimistic version check failed twice in a row.
    ConcurrentModification,
    NotFound,
    Internal,
}

#[derive(Debug, Clone)]
pub struct ActionError {
    kind: ActionErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl ActionError {
    pub fn new(kind: ActionErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: ActionErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> ActionErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ActionError {}

pub type ActionResult<T> = Result<T, ActionError>;

pub(crate) fn invalid_transition(message: impl Into<String>) -> ActionError {
    ActionError::with_message(
        ActionErrorKind::InvalidTransition,
        codes::INVALID_TRANSITION,
        message,
    )
}

pub(crate) fn illegal_state(message: impl Into<String>) -> ActionError {
    ActionError::with_message(ActionErrorKind::IllegalState, codes::ILLEGAL_STATE, message)
}

pub(crate) fn internal(message: impl Into<String>) -> ActionError {
    ActionError::with_message(ActionErrorKind::Internal, codes::INTERNAL_ERROR, message)
}
