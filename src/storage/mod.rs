//! Storage layer: the vector arena and index checkpoints.
//!
//! Vectors live in a [`VectorStore`] in the precision chosen at creation.
//! Durability for the mutable index comes from bincode checkpoints with a
//! CRC32 footer (atomic temp-file + rename).

/// Checkpoint save/load with atomic writes.
pub mod persistence;
/// Append-only vector arena.
pub mod vectors;

pub use persistence::{load_checkpoint, save_checkpoint};
pub use vectors::{PrecisionMode, VectorStore};
