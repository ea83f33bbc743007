// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Single-writer documentation and enforcement.
//!
//! Every index store is written through exactly one `tokio-rusqlite`
//! connection. The `Database` struct IS the single writer: the index layer
//! accepts `&Database` and calls through `database.connection().call()`.
//!
//! A full reindex builds a second, temporary `Database` at a different path.
//! It is never written by more than one task either: the sync actor owns it
//! until the swap, after which it becomes the live store.
//!
//! **Do NOT create additional Connection instances for writes.**

// - `Database` wraps a single `tokio_rusqlite::Connection`
// - tokio-rusqlite serializes all closure calls on one background thread
// - only the sync actor issues write transactions, so they never overlap
