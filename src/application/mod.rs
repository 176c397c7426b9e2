//! The derived-image pipeline and the contracts its collaborators implement.

pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod response;
pub mod sources;
pub mod stream;
pub mod transform;
