//! Line source -- turns an async reader into entries.
//!
//! Every non-empty line becomes one [`Entry`] stamped with the read time.
//! Labels are attached downstream by the static label middleware.

use logweave_core::{Entry, LabelSet};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Read lines until EOF, shutdown, or the receiver closes.
///
/// Returns the number of entries sent.
pub async fn read_lines<R>(
    reader: R,
    tx: &mpsc::Sender<Entry>,
    shutdown: &CancellationToken,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut sent = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.is_empty() {
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            res = tx.send(Entry::now(LabelSet::new(), line)) => {
                if res.is_err() {
                    tracing::warn!("source receiver closed, stopping");
                    break;
                }
                sent += 1;
            }
        }
    }

    tracing::debug!(sent, "source finished");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn skips_empty_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let input: &[u8] = b"one\n\ntwo\n";
        let sent = read_lines(BufReader::new(input), &tx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sent, 2);
        assert_eq!(rx.recv().await.unwrap().line, "one");
        assert_eq!(rx.recv().await.unwrap().line, "two");
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let (tx, _rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let input: &[u8] = b"a\nb\nc\n";
        let sent = read_lines(BufReader::new(input), &tx, &shutdown).await.unwrap();
        assert_eq!(sent, 0);
    }
}
