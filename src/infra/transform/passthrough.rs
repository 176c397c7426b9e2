use async_trait::async_trait;

use crate::application::stream::{self, ByteStream};
use crate::application::transform::{ImageTransformer, TransformError, TransformOutput};
use crate::domain::CommandSet;

use super::sniff_content_type;

/// Serves source bytes unchanged after checking they are an image.
///
/// Used when no external engine is configured; commands still partition the
/// cache but do not alter the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughTransformer;

#[async_trait]
impl ImageTransformer for PassthroughTransformer {
    async fn transform(
        &self,
        source: ByteStream,
        _commands: &CommandSet,
    ) -> Result<TransformOutput, TransformError> {
        let bytes = stream::collect(source).await?;
        let content_type = sniff_content_type(&bytes)
            .ok_or_else(|| TransformError::Unsupported("source is not a recognised image".into()))?;

        Ok(TransformOutput {
            body: stream::once(bytes),
            content_type: content_type.to_string(),
        })
    }
}
