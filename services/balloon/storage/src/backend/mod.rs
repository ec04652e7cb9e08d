//! Chunk store implementations

pub mod file;
pub mod mem;
