// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod db;
pub mod gateway;
pub mod telemetry;
pub mod time;
