// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{ActionError, ActionErrorKind, ActionResult, codes};
use crate::app::ports::SubmissionGatewayPort;
use crate::app::types::SubmissionSpec;

/// Gateway adapter that delegates to operator-provided commands, so the
/// cluster wire protocol stays outside the daemon. The submit command is
/// invoked as `<command> <cluster_id> <artifact> [args...]` and must print
/// the remote job handle on stdout; the cancel command is invoked as
/// `<command> <handle>`.
pub struct CommandGateway {
    submit_command: String,
    cancel_command: String,
}

impl CommandGateway {
    pub fn new(submit_command: impl Into<String>, cancel_command: impl Into<String>) -> Self {
        Self {
            submit_command: submit_command.into(),
            cancel_command: cancel_command.into(),
        }
    }
}

fn split_command(line: &str) -> ActionResult<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next().ok_or_else(|| {
        ActionError::with_message(
            ActionErrorKind::Submission,
            codes::SUBMISSION_FAILED,
            "gateway command is empty",
        )
    })?;
    Ok((program, parts.collect()))
}

fn command_failed(program: &str, detail: String) -> ActionError {
    ActionError::with_message(
        ActionErrorKind::Submission,
        codes::SUBMISSION_FAILED,
        format!("gateway command '{program}' failed"),
    )
    .with_context(detail)
}

async fn run(program: &str, fixed_args: &[String], extra_args: &[String]) -> ActionResult<String> {
    let output = Command::new(program)
        .args(fixed_args)
        .args(extra_args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| command_failed(program, err.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(command_failed(
            program,
            format!("exit status {}: {stderr}", output.status),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl SubmissionGatewayPort for CommandGateway {
    async fn submit(&self, spec: &SubmissionSpec) -> ActionResult<String> {
        let (program, mut args) = split_command(&self.submit_command)?;
        args.push(spec.cluster_id.clone());
        args.push(spec.artifact.clone());
        let handle = run(&program, &args, &spec.args).await?;
        if handle.is_empty() {
            return Err(command_failed(
                &program,
                "no remote handle on stdout".to_string(),
            ));
        }
        Ok(handle)
    }

    async fn cancel(&self, handle: &str) -> ActionResult<()> {
        let (program, mut args) = split_command(&self.cancel_command)?;
        args.push(handle.to_string());
        run(&program, &args, &[]).await?;
        Ok(())
    }
}
