//! Shared utilities.
//!
//! Folder hashing plus in-memory test doubles.

pub mod hash;

#[cfg(test)]
pub mod testutil;
