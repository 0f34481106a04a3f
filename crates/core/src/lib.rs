//! `emoqueue-core`: identifiers shared by the queue and its collaborators.
//!
//! This crate is **pure**: no async runtime, no I/O.

pub mod error;
pub mod id;

pub use error::IdError;
pub use id::{ContentItemId, JobId};
