//! Contract for the opaque image transformation capability.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::application::stream::ByteStream;
use crate::domain::CommandSet;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unsupported input: {0}")]
    Unsupported(String),
    #[error("transformer unavailable: {0}")]
    Unavailable(std::io::Error),
    #[error("transformer exited with status {exit_code:?}: {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("transformation timed out after {0:?}")]
    Timeout(Duration),
    #[error("transformation failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output of a transformer before it is buffered by the pipeline.
pub struct TransformOutput {
    pub body: ByteStream,
    pub content_type: String,
}

/// A fully buffered derived artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Produces a derived image from a source stream and a command set.
///
/// The pipeline never inspects pixel data; everything it knows about the
/// result is the returned bytes and content type.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(
        &self,
        source: ByteStream,
        commands: &CommandSet,
    ) -> Result<TransformOutput, TransformError>;
}
