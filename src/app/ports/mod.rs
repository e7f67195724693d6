// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod event_sink;
pub mod gateway;
pub mod record_store;

pub use clock::ClockPort;
pub use event_sink::{EventSinkPort, NoopEventSink};
pub use gateway::SubmissionGatewayPort;
pub use record_store::ApplicationRecordStorePort;
