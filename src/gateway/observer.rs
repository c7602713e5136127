//! Response Observer (C7): tees upstream response bytes into an
//! accumulating buffer for the metadata parser (C4) while forwarding them
//! to the client unchanged and in order. Generalizes the teacher's
//! provider-specific `ShadowStream`, which only ever scraped OpenAI SSE
//! usage, into a provider-agnostic adapter used by all three providers.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::oneshot;

use super::error::sse_error_frame;

/// Bytes accumulated so far, shared between the stream adapter (producer)
/// and whoever calls the metadata parser against a growing snapshot
/// (consumer). A `Mutex` is enough — per spec §5, a single request's
/// pipeline stages are strictly sequential, so there is no real
/// contention, just a shared owner.
#[derive(Clone, Default)]
pub struct TeeBuffer(Arc<Mutex<Vec<u8>>>);

impl TeeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of everything observed so far. Parsers re-scan this
    /// from the start every time (spec §4.4 idempotence).
    pub fn snapshot(&self) -> Vec<u8> {
        self.0.lock().expect("tee buffer poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("tee buffer poisoned").len()
    }

    fn push(&self, chunk: &[u8]) {
        self.0.lock().expect("tee buffer poisoned").extend_from_slice(chunk);
    }
}

/// Wraps an upstream byte stream, pushing every chunk into a `TeeBuffer`
/// as it passes through untouched. Back-pressure: the tee is a synchronous
/// in-process copy, so it never stalls the forwarded stream — the
/// downstream client socket remains the only rate-determining writer
/// (spec §4.7).
pub struct ObservedStream<S> {
    inner: Pin<Box<S>>,
    tee: TeeBuffer,
    bytes_written: Arc<Mutex<u64>>,
    /// Fires exactly once: `Some(true)` on clean end-of-stream, `Some(false)`
    /// if the stream is dropped early (client disconnect or upstream error)
    /// before ever reaching end-of-stream. The pipeline's background task
    /// uses this to decide between a full parse-and-reconcile and a
    /// best-effort release of the original reservation (spec §4.9).
    done: Option<oneshot::Sender<bool>>,
    /// Set once an upstream error has been substituted with an SSE error
    /// frame, so the next poll ends the stream instead of re-polling a
    /// source that already yielded `Err` (spec §7: the status code is
    /// fixed once streaming headers are sent, so the client only ever
    /// sees a well-formed SSE terminator, never a raw transport error).
    errored: bool,
}

impl<S> ObservedStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send,
{
    pub fn new(
        inner: S,
        tee: TeeBuffer,
        bytes_written: Arc<Mutex<u64>>,
        done: oneshot::Sender<bool>,
    ) -> Self {
        Self {
            inner: Box::pin(inner),
            tee,
            bytes_written,
            done: Some(done),
            errored: false,
        }
    }
}

impl<S> Stream for ObservedStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.errored {
            return Poll::Ready(None);
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.tee.push(&chunk);
                *self.bytes_written.lock().expect("poisoned") += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(done) = self.done.take() {
                    let _ = done.send(false);
                }
                self.errored = true;
                let frame = Bytes::from(sse_error_frame(&e.to_string()));
                self.tee.push(&frame);
                *self.bytes_written.lock().expect("poisoned") += frame.len() as u64;
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                if let Some(done) = self.done.take() {
                    let _ = done.send(true);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for ObservedStream<S> {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn tees_bytes_without_reordering_or_dropping() {
        let tee = TeeBuffer::new();
        let written = Arc::new(Mutex::new(0u64));
        let (done_tx, done_rx) = oneshot::channel();
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let mut observed = ObservedStream::new(stream::iter(chunks), tee.clone(), written.clone(), done_tx);

        let mut forwarded = Vec::new();
        use futures::StreamExt;
        while let Some(chunk) = observed.next().await {
            forwarded.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(forwarded, b"hello world");
        assert_eq!(tee.snapshot(), b"hello world");
        assert_eq!(*written.lock().unwrap(), 11);
        assert_eq!(done_rx.await, Ok(true));
    }

    #[tokio::test]
    async fn upstream_error_becomes_sse_frame_not_io_error() {
        use futures::StreamExt;

        let tee = TeeBuffer::new();
        let written = Arc::new(Mutex::new(0u64));
        let (done_tx, done_rx) = oneshot::channel();
        let client = reqwest::Client::new();
        let req_err = client.get("http://127.0.0.1:1/").send().await.unwrap_err();
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from_static(b"partial")), Err(req_err)];
        let mut observed = ObservedStream::new(stream::iter(chunks), tee.clone(), written, done_tx);

        let first = observed.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"partial");

        let second = observed.next().await.unwrap().unwrap();
        assert!(second.starts_with(b"data: {"));
        assert!(observed.next().await.is_none());

        assert!(tee.snapshot().ends_with(b"[DONE]\n\n"));
        assert_eq!(done_rx.await, Ok(false));
    }

    #[tokio::test]
    async fn dropping_before_completion_signals_incomplete() {
        let tee = TeeBuffer::new();
        let written = Arc::new(Mutex::new(0u64));
        let (done_tx, done_rx) = oneshot::channel();
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![Ok(Bytes::from_static(b"partial"))];
        let observed = ObservedStream::new(stream::iter(chunks), tee, written, done_tx);
        drop(observed);
        assert_eq!(done_rx.await, Ok(false));
    }
}
