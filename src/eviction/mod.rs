//! Eviction policies for the two cache tiers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  lru.rs   - Memory tier                                      │
//! │  └─ LruMap: slab-backed doubly linked list + hash index      │
//! │  └─ O(1) touch on get, O(1) evict of least recently used     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  size.rs  - Persistent tier                                  │
//! │  └─ select_size_victims: oldest cached_at first until        │
//! │     overflow + buffer is freed                               │
//! │  └─ select_sweep_victims: expired or older than max age      │
//! │  └─ Dirty entries are never selected                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The memory tier evicts by access order, not insertion order. The
//! persistent tier evicts by age, since reads there are rare and tracking
//! access order on disk would turn every read into a write.

pub mod lru;
pub mod size;

pub use lru::LruMap;
pub use size::{select_size_victims, select_sweep_victims, EvictionCandidate};
