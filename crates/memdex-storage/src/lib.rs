// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the memdex memory index.
//!
//! Provides WAL-mode SQLite stores with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, the optional sqlite-vec extension
//! hook, and the crash-safe file swap used by full reindexes.

pub mod database;
pub mod migrations;
pub mod swap;
pub mod writer;

pub use database::{Database, map_tr_err, register_vector_extension};
pub use swap::{
    backup_path_for, begin_swap, remove_index_files, swap_index_files, temp_path_for, PendingSwap,
};
