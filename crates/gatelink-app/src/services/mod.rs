// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service layer: bridges the front end to the gatelink backend crates.
//
// Each service wraps one or more backend crate APIs and returns data the
// front end can display directly.

pub mod app_services;
pub mod data_dir;
pub mod gateway_client;
