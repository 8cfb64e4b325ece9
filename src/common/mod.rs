//! Shared building blocks: errors, value types, channels and trait seams

pub mod channels;
pub mod errors;
pub mod traits;
pub mod types;
