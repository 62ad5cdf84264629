//! Batch module - row accumulation for one INSERT
//!
//! `BatchBuilder` collects rows into a `Block` shaped by the server's insert
//! header and encodes it into a `ChunkedBuffer` ready for a sender.

mod builder;
mod column;

#[cfg(test)]
mod builder_test;

pub use builder::BatchBuilder;
pub use column::BatchColumn;
