//! The two kinds of connection a session holds, as seen by the registry.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use parley_proto::{BrokerServerMessage, ServerMessage};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("link closed")]
pub struct LinkClosed;

/// Reliable control connection.
pub trait SignalingLink: Send + Sync {
    fn send(&self, message: ServerMessage) -> Result<(), LinkClosed>;
    /// Drop the connection. Repeated calls are harmless.
    fn disconnect(&self);
}

/// Broker connection for the peer-media layer.
pub trait PeerMediaLink: Send + Sync {
    /// Distinguishes two links that claim the same identity.
    fn link_id(&self) -> Uuid;
    fn send(&self, message: BrokerServerMessage) -> Result<(), LinkClosed>;
    /// Drop the connection. Repeated calls are harmless.
    fn close(&self);
}

#[derive(Debug)]
pub enum Outbound<M> {
    Message(M),
    Close,
}

/// Link backed by a WebSocket writer task. The socket handler owns the
/// receiving end of the queue and waits on `shutdown` to stop reading.
pub struct WsLink<M> {
    id: Uuid,
    tx: mpsc::UnboundedSender<Outbound<M>>,
    shutdown: Arc<Notify>,
    closed: AtomicBool,
}

impl<M> WsLink<M> {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound<M>>, Arc<Notify>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let link = Self {
            id: Uuid::new_v4(),
            tx,
            shutdown: shutdown.clone(),
            closed: AtomicBool::new(false),
        };
        (link, rx, shutdown)
    }

    fn push(&self, message: M) -> Result<(), LinkClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkClosed);
        }
        self.tx.send(Outbound::Message(message)).map_err(|_| LinkClosed)
    }

    fn shut(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Outbound::Close);
        self.shutdown.notify_one();
    }
}

impl SignalingLink for WsLink<ServerMessage> {
    fn send(&self, message: ServerMessage) -> Result<(), LinkClosed> {
        self.push(message)
    }

    fn disconnect(&self) {
        self.shut();
    }
}

impl PeerMediaLink for WsLink<BrokerServerMessage> {
    fn link_id(&self) -> Uuid {
        self.id
    }

    fn send(&self, message: BrokerServerMessage) -> Result<(), LinkClosed> {
        self.push(message)
    }

    fn close(&self) {
        self.shut();
    }
}

type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// In-memory link that records traffic, for tests and embedding.
pub struct MemoryLink<M> {
    id: Uuid,
    sent: Mutex<Vec<M>>,
    closes: AtomicUsize,
    on_close: Mutex<Option<CloseHook>>,
}

impl<M: Clone> MemoryLink<M> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            on_close: Mutex::new(None),
        })
    }

    pub fn sent(&self) -> Vec<M> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<M> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// How many times the owner asked this link to close.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Run `hook` whenever the link is closed, as a transport would by
    /// reporting its own disconnect.
    pub fn on_close(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_close.lock() = Some(Arc::new(hook));
    }

    fn record(&self, message: M) -> Result<(), LinkClosed> {
        if self.is_closed() {
            return Err(LinkClosed);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn shut(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_close.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl SignalingLink for MemoryLink<ServerMessage> {
    fn send(&self, message: ServerMessage) -> Result<(), LinkClosed> {
        self.record(message)
    }

    fn disconnect(&self) {
        self.shut();
    }
}

impl PeerMediaLink for MemoryLink<BrokerServerMessage> {
    fn link_id(&self) -> Uuid {
        self.id
    }

    fn send(&self, message: BrokerServerMessage) -> Result<(), LinkClosed> {
        self.record(message)
    }

    fn close(&self) {
        self.shut();
    }
}
