// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the memdex memory index.
//!
//! A [`MemdexConfig`] is read through [`load`] from a [`ConfigSource`]:
//! the layered XDG lookup with `MEMDEX_*` overrides, one explicit file, or
//! an inline TOML string. Unknown keys are rejected at parse time and
//! semantic rules are checked afterwards; either way the caller gets every
//! problem as a [`ConfigError`] diagnostic.
//!
//! ```no_run
//! use memdex_config::{load, render_report, ConfigSource};
//!
//! match load(ConfigSource::Layered) {
//!     Ok(config) => println!("index at {}", config.store.resolved_path().display()),
//!     Err(errors) => eprint!("{}", render_report(&errors)),
//! }
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{render_report, summarize, ConfigError};
pub use loader::{load, ConfigSource};
pub use model::MemdexConfig;
pub use validation::validate_config;
