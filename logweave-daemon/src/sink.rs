//! JSON lines sink -- writes entries to an async writer.
//!
//! Each entry is written as `{"timestamp":..,"labels":{..},"line":..}` followed by `\n`.

use logweave_core::Entry;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Write entries until every sender is dropped.
///
/// Returns the writer and the number of entries written.
pub async fn write_entries<W>(
    mut rx: mpsc::Receiver<Entry>,
    mut writer: W,
) -> std::io::Result<(W, u64)>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(entry) = rx.recv().await {
        let mut buf = serde_json::to_vec(&entry).map_err(std::io::Error::other)?;
        buf.push(b'\n');
        writer.write_all(&buf).await?;
        written += 1;
    }
    writer.flush().await?;
    Ok((writer, written))
}
