//! Byte stream plumbing shared by providers, stores and transformers.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream, stream::BoxStream};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Owned, sendable stream of byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, io::Error>>;

const CHUNK_SIZE: usize = 64 * 1024;

/// Wrap an in-memory buffer as a single-chunk stream.
pub fn once(bytes: Bytes) -> ByteStream {
    stream::once(async move { Ok(bytes) }).boxed()
}

/// Read an async reader to completion in fixed-size chunks.
pub fn from_reader<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::try_unfold(reader, |mut reader| async move {
        let mut buffer = BytesMut::with_capacity(CHUNK_SIZE);
        let read = reader.read_buf(&mut buffer).await?;
        if read == 0 {
            Ok(None)
        } else {
            Ok(Some((buffer.freeze(), reader)))
        }
    })
    .boxed()
}

/// Buffer the whole stream into memory.
pub async fn collect(stream: ByteStream) -> Result<Bytes, io::Error> {
    let chunks: Vec<Bytes> = stream.try_collect().await?;
    match chunks.len() {
        0 => Ok(Bytes::new()),
        1 => Ok(chunks.into_iter().next().unwrap_or_default()),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut buffer = BytesMut::with_capacity(total);
            for chunk in chunks {
                buffer.extend_from_slice(&chunk);
            }
            Ok(buffer.freeze())
        }
    }
}
