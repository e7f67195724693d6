// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::LifecycleEvent;

/// Fire-and-forget sink for lifecycle events; the alerting collaborator
/// listens here. The controller never waits on delivery.
pub trait EventSinkPort: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

#[derive(Clone, Default)]
pub struct NoopEventSink;

impl EventSinkPort for NoopEventSink {
    fn publish(&self, _event: LifecycleEvent) {}
}
