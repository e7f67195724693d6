// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::ActionResult;
use crate::app::types::SubmissionSpec;

/// Boundary to the remote cluster/resource manager. Both calls may hang on
/// an unresponsive cluster; the controller bounds every call with its own
/// timeout and never relies on the gateway returning promptly.
#[async_trait]
pub trait SubmissionGatewayPort: Send + Sync {
    /// Submit the application; on success returns the opaque remote job
    /// handle needed for later cancel/query.
    async fn submit(&self, spec: &SubmissionSpec) -> ActionResult<String>;
    /// Ask the cluster to cancel the job behind `handle`.
    async fn cancel(&self, handle: &str) -> ActionResult<()>;
}
