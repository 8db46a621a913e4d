//! Wire and storage models, maintained in the form emitted by prost-build.

pub mod inference;
pub mod record;
