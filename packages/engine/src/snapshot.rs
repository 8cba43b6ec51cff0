use async_trait::async_trait;

use crate::LixError;

/// Chunk size backends should aim for when streaming a database image.
pub const SNAPSHOT_CHUNK_SIZE: usize = 64 * 1024;

/// Produces a database image chunk by chunk; `None` ends the stream.
#[async_trait(?Send)]
pub trait SnapshotSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, LixError>;
}

/// Receives a database image chunk by chunk. `finish` runs once after the
/// last chunk so sinks can flush.
#[async_trait(?Send)]
pub trait SnapshotSink: Send {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), LixError>;

    async fn finish(&mut self) -> Result<(), LixError> {
        Ok(())
    }
}

/// Drains a source into one contiguous image, for backends that cannot
/// restore incrementally.
pub async fn collect_snapshot(source: &mut dyn SnapshotSource) -> Result<Vec<u8>, LixError> {
    let mut image = Vec::new();
    while let Some(chunk) = source.next_chunk().await? {
        image.extend_from_slice(&chunk);
    }
    Ok(image)
}
