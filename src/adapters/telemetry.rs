// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::EventSinkPort;
use crate::app::types::LifecycleEvent;

#[derive(Clone, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSinkPort for TracingEventSink {
    fn publish(&self, event: LifecycleEvent) {
        let LifecycleEvent {
            app_id,
            old_state,
            new_state,
            cause,
            at,
        } = event;

        tracing::info!(
            target: "lifecycled::events",
            app_id = %app_id,
            old_state = old_state.as_str(),
            new_state = new_state.as_str(),
            cause = cause.as_str(),
            at = %at,
        );
    }
}
