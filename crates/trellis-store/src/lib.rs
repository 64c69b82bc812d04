//! Trellis record-store boundary
//!
//! The record store is the engine's single source of truth: durable,
//! append-only storage for interaction records and ephemeral-media
//! metadata, with per-subject change fan-out. Everything the engine
//! holds in memory is a derived, disposable cache of what lives behind
//! these traits.
//!
//! `MemoryStore` is a complete in-process implementation used by the
//! integration suites and by single-process embedders; production
//! backends adapt their managed store to the same traits.

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{ChangeStream, InteractionStore, MediaStore, StreamItem};
