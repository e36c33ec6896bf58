// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local persistent key-value storage.
//!
//! Both the persistent cache tier and the offline store sit on a [`KvStore`]:
//! a flat string-to-string map with key enumeration. Two backends ship:
//! - [`SqliteKv`]: durable, a single SQLite table in WAL mode
//! - [`InMemoryKv`]: process-local, for tests and throwaway sessions

pub mod traits;
pub mod memory;
pub mod sql;

pub use traits::{KvStore, StorageError};
pub use memory::InMemoryKv;
pub use sql::SqliteKv;
