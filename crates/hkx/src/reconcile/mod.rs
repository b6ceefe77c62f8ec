// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type and graph reconciliation: minimization, cross-version migration
//! and structural comparison.

pub mod diff;
pub mod migrate;
pub mod minimize;

pub use diff::{diff, DiffOptions, Difference};
pub use migrate::{migrate, MigrationReport};
pub use minimize::minimize;
