use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::client::ByteStream;
use crate::error::{ChatError, ChatResult};

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Incremental UTF-8 text accumulated from a chunked byte stream
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    /// Decoded text so far
    text: String,
    /// Bytes of a multi-byte character whose remainder has not arrived yet
    pending: Vec<u8>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the number of bytes of text appended.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> usize {
        let before = self.text.len();

        let mut owned;
        let mut input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            owned = std::mem::take(&mut self.pending);
            owned.extend_from_slice(chunk);
            &owned
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is well formed
                    self.text
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            self.text.push(REPLACEMENT);
                            input = &rest[bad..];
                        }
                        None => {
                            self.pending.extend_from_slice(rest);
                            break;
                        }
                    }
                }
            }
        }

        self.text.len() - before
    }

    /// Flush an incomplete trailing sequence at end of stream
    pub fn finish(&mut self) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        self.pending.clear();
        self.text.push(REPLACEMENT);
        REPLACEMENT.len_utf8()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Turns a chat response body into cumulative text snapshots.
///
/// Each snapshot extends the previous one. The decoder is single use: once it
/// reports the end, a fail or a cancellation, it yields nothing further.
pub struct StreamDecoder {
    source: Option<ByteStream>,
    state: StreamState,
    cancel: CancellationToken,
    chunks: usize,
}

impl StreamDecoder {
    pub fn new(source: ByteStream, cancel: CancellationToken) -> Self {
        Self {
            source: Some(source),
            state: StreamState::new(),
            cancel,
            chunks: 0,
        }
    }

    /// Await the next snapshot.
    ///
    /// `None` means the stream ended normally. Chunks that only complete part of
    /// a character do not produce a snapshot of their own.
    pub async fn next_snapshot(&mut self) -> Option<ChatResult<String>> {
        loop {
            let source = self.source.as_mut()?;

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                chunk = source.next() => Some(chunk),
            };

            let Some(chunk) = next else {
                debug!(chunks = self.chunks, "stream read cancelled");
                self.release();
                return Some(Err(ChatError::Cancelled));
            };

            match chunk {
                Some(Ok(bytes)) => {
                    self.chunks += 1;
                    let grew = self.state.push_chunk(&bytes);
                    trace!(chunk = self.chunks, len = bytes.len(), grew, "chunk decoded");
                    if grew > 0 {
                        return Some(Ok(self.state.text().to_string()));
                    }
                }
                Some(Err(e)) => {
                    self.release();
                    return Some(Err(e));
                }
                None => {
                    self.release();
                    if self.state.finish() > 0 {
                        return Some(Ok(self.state.text().to_string()));
                    }
                    return None;
                }
            }
        }
    }

    /// Text decoded so far
    pub fn text(&self) -> &str {
        self.state.text()
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_none()
    }

    /// Drop the underlying body so the connection is released
    fn release(&mut self) {
        self.source = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::channel::mpsc;

    fn decode_all(chunks: &[&[u8]]) -> String {
        let mut state = StreamState::new();
        for chunk in chunks {
            state.push_chunk(chunk);
        }
        state.finish();
        state.into_text()
    }

    fn body(chunks: Vec<ChatResult<Bytes>>) -> ByteStream {
        futures::stream::iter(chunks).boxed()
    }

    #[test]
    fn test_concatenation_matches_contiguous_decode() {
        let text = "Hi there, 안녕하세요 👋 café";
        let bytes = text.as_bytes();

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), text, "split at {}", split);
        }
    }

    #[test]
    fn test_multibyte_split_is_buffered() {
        let bytes = "한".as_bytes();
        assert_eq!(bytes.len(), 3);

        let mut state = StreamState::new();
        assert_eq!(state.push_chunk(&bytes[..1]), 0);
        assert!(state.has_pending());
        assert_eq!(state.push_chunk(&bytes[1..2]), 0);
        assert_eq!(state.push_chunk(&bytes[2..]), 3);
        assert_eq!(state.text(), "한");
        assert!(!state.has_pending());
    }

    #[test]
    fn test_byte_at_a_time() {
        let text = "emoji 🎉 done";
        let chunks: Vec<&[u8]> = text.as_bytes().chunks(1).collect();
        assert_eq!(decode_all(&chunks), text);
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        assert_eq!(decode_all(&[b"ok\xffok"]), "ok\u{FFFD}ok");
    }

    #[test]
    fn test_truncated_tail_flushed_once() {
        let bytes = "€".as_bytes();
        assert_eq!(decode_all(&[b"a", &bytes[..2]]), "a\u{FFFD}");
    }

    #[tokio::test]
    async fn test_snapshots_are_cumulative() {
        let euro = "€".as_bytes();
        let source = body(vec![
            Ok(Bytes::from_static(b"Hi")),
            Ok(Bytes::copy_from_slice(&euro[..1])),
            Ok(Bytes::copy_from_slice(&euro[1..])),
            Ok(Bytes::from_static(b" there")),
        ]);
        let mut decoder = StreamDecoder::new(source, CancellationToken::new());

        let mut snapshots = Vec::new();
        while let Some(snapshot) = decoder.next_snapshot().await {
            snapshots.push(snapshot.unwrap());
        }

        assert_eq!(snapshots, vec!["Hi", "Hi€", "Hi€ there"]);
        for pair in snapshots.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
        assert!(decoder.is_finished());
        assert!(decoder.next_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_stops_stream() {
        let source = body(vec![
            Ok(Bytes::from_static(b"Partial")),
            Err(ChatError::Other("connection reset".to_string())),
            Ok(Bytes::from_static(b" never")),
        ]);
        let mut decoder = StreamDecoder::new(source, CancellationToken::new());

        assert_eq!(decoder.next_snapshot().await.unwrap().unwrap(), "Partial");
        assert!(decoder.next_snapshot().await.unwrap().is_err());
        assert!(decoder.next_snapshot().await.is_none());
        assert_eq!(decoder.text(), "Partial");
    }

    #[tokio::test]
    async fn test_cancellation_releases_source() {
        let (tx, rx) = mpsc::unbounded::<ChatResult<Bytes>>();
        tx.unbounded_send(Ok(Bytes::from_static(b"first"))).unwrap();

        let cancel = CancellationToken::new();
        let mut decoder = StreamDecoder::new(rx.boxed(), cancel.clone());
        assert_eq!(decoder.next_snapshot().await.unwrap().unwrap(), "first");

        cancel.cancel();
        tx.unbounded_send(Ok(Bytes::from_static(b" second"))).unwrap();
        assert!(matches!(
            decoder.next_snapshot().await,
            Some(Err(ChatError::Cancelled))
        ));
        assert!(decoder.is_finished());
        assert!(tx.is_closed());
        assert_eq!(decoder.text(), "first");
    }
}
