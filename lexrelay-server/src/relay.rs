//! Chat relay pump.
//!
//! One task per client request: open the upstream stream, reassemble lines,
//! run each through the request's [`RelaySession`], and enqueue accepted
//! frames on an unbounded channel that backs the HTTP response body.
//!
//! Enqueueing never blocks the read loop. When the client goes away axum drops
//! the body, the channel closes, and the pump stops reading; dropping the
//! upstream stream aborts the upstream request.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use lexrelay_core::{
    sse, ChatBackend, ChatRequest, LineReassembler, Outcome, RelaySession, UpstreamError,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::Instrument;

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// `[DONE]` received and re-emitted.
    Done,
    /// Upstream body ended without `[DONE]`.
    UpstreamClosed,
    /// An error frame was sent to the client.
    Failed,
    /// The client stopped listening.
    ClientGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub end: RelayEnd,
    pub forwarded: usize,
    pub dropped: usize,
    pub dropped_bytes: usize,
}

impl RelaySummary {
    fn ended(end: RelayEnd) -> Self {
        Self {
            end,
            forwarded: 0,
            dropped: 0,
            dropped_bytes: 0,
        }
    }
}

/// Start relaying `request` in the background. The receiver yields SSE
/// frames ready to write to the client; it closes when the session ends.
pub fn spawn_relay(backend: Arc<dyn ChatBackend>, request: ChatRequest) -> UnboundedReceiver<Bytes> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = RelaySession::new();

    let span = tracing::info_span!(
        "relay",
        session_id = %session.id(),
        conversation_id = request.conversation_id.as_deref().unwrap_or(""),
        backend = backend.name(),
    );

    tokio::spawn(
        async move {
            run_relay(backend.as_ref(), &request, session, tx).await;
        }
        .instrument(span),
    );

    rx
}

/// Open the upstream stream and pump it. Upstream failures become a single
/// error frame.
pub async fn run_relay(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    session: RelaySession,
    tx: UnboundedSender<Bytes>,
) -> RelaySummary {
    let opened = tokio::select! {
        _ = tx.closed() => {
            tracing::info!("Client disconnected before upstream answered");
            return RelaySummary::ended(RelayEnd::ClientGone);
        }
        opened = backend.stream_chat(request) => opened,
    };

    match opened {
        Ok(body) => pump(body, session, &tx).await,
        Err(e) => {
            tracing::error!(error = %e, "Upstream chat request failed");
            let _ = tx.send(sse::error_frame(&e.to_string()));
            RelaySummary::ended(RelayEnd::Failed)
        }
    }
}

/// Relay an already-open upstream body to `tx`.
pub async fn pump<S>(body: S, mut session: RelaySession, tx: &UnboundedSender<Bytes>) -> RelaySummary
where
    S: Stream<Item = Result<Bytes, UpstreamError>> + Unpin,
{
    let reader = StreamReader::new(body.map_err(std::io::Error::other));
    let mut lines = FramedRead::new(reader, LineReassembler::new());

    let mut forwarded = 0;
    let mut dropped = 0;

    let end = loop {
        let next = tokio::select! {
            _ = tx.closed() => break RelayEnd::ClientGone,
            next = lines.next() => next,
        };

        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                tracing::error!(error = %e, "Upstream stream failed mid-flight");
                let _ = tx.send(sse::error_frame(&e.to_string()));
                break RelayEnd::Failed;
            }
            None => break RelayEnd::UpstreamClosed,
        };

        match session.process_line(&line) {
            Outcome::Forward(frame) => {
                if tx.send(sse::data_frame(frame.raw())).is_err() {
                    break RelayEnd::ClientGone;
                }
                forwarded += 1;
            }
            Outcome::Drop => {
                if line.starts_with(sse::DATA_PREFIX) {
                    dropped += 1;
                }
            }
            Outcome::Terminate => {
                let _ = tx.send(sse::done_frame());
                break RelayEnd::Done;
            }
        }
    };

    let summary = RelaySummary {
        end,
        forwarded,
        dropped,
        dropped_bytes: lines.decoder().dropped_bytes(),
    };

    tracing::info!(
        end = ?summary.end,
        forwarded = summary.forwarded,
        dropped = summary.dropped,
        workflow = session.is_workflow_mode(),
        "Relay session finished"
    );

    summary
}
