// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod controller;
pub mod errors;
pub mod machine;
pub mod ports;
pub mod types;
