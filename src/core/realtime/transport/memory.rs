//! In-process duplex transport.
//!
//! [`memory_transport`] returns a connector for the session and a
//! [`MemoryPeer`] that plays the model: it reads what the session sent and
//! pushes inbound messages, errors, or end of stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{
    DuplexChannel, EventSink, EventSource, TransportConnector, TransportError, TransportResult,
};

type Inbound = Result<String, String>;

struct Ends {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Create a connected connector/peer pair.
pub fn memory_transport() -> (MemoryConnector, MemoryPeer) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());

    let connector = MemoryConnector {
        ends: Mutex::new(Some(Ends {
            outbound_tx,
            inbound_rx,
        })),
        failure: None,
        counters: counters.clone(),
    };
    let peer = MemoryPeer {
        outbound_rx,
        inbound_tx: Some(inbound_tx),
        counters,
    };
    (connector, peer)
}

/// Connector half handed to the session. Opens at most once.
pub struct MemoryConnector {
    ends: Mutex<Option<Ends>>,
    failure: Option<String>,
    counters: Arc<Counters>,
}

impl MemoryConnector {
    /// A connector whose `open` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            ends: Mutex::new(None),
            failure: Some(reason.into()),
            counters: Arc::new(Counters::default()),
        }
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn open(&self) -> TransportResult<DuplexChannel> {
        if let Some(reason) = &self.failure {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }
        let ends = self
            .ends
            .lock()
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("already opened".to_string()))?;
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        Ok(DuplexChannel {
            sink: Arc::new(MemorySink {
                tx: ends.outbound_tx,
                closed: AtomicBool::new(false),
                counters: self.counters.clone(),
            }),
            source: Box::new(MemorySource {
                rx: ends.inbound_rx,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, event: String) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(event)
            .map_err(|_| TransportError::SendFailed("peer dropped".to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl EventSource for MemorySource {
    async fn receive(&mut self) -> TransportResult<Option<String>> {
        match self.rx.recv().await {
            Some(Ok(text)) => Ok(Some(text)),
            Some(Err(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// The model's side of a memory transport.
pub struct MemoryPeer {
    outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: Option<mpsc::UnboundedSender<Inbound>>,
    counters: Arc<Counters>,
}

impl MemoryPeer {
    /// Next message the session sent, waiting at most `wait`.
    pub async fn next_sent(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.outbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Every message already sent and not yet read.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.outbound_rx.try_recv() {
            sent.push(text);
        }
        sent
    }

    /// Deliver an inbound message to the session.
    pub fn push_inbound(&self, text: impl Into<String>) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(text.into())).is_ok())
    }

    /// Make the session's next receive fail.
    pub fn push_error(&self, reason: impl Into<String>) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(Err(reason.into())).is_ok())
    }

    /// Signal end of stream once queued messages are consumed.
    pub fn end_stream(&mut self) {
        self.inbound_tx = None;
    }

    pub fn open_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}
