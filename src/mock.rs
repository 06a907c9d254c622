//! An in-memory duplex transport for tests (feature `testing`).
//!
//! Concrete adapters are out of scope for this crate (spec §1), but the
//! channel's own tests need *something* implementing [`IoInterface`].
//! This is the minimal thing: two halves of an unbounded mpsc pair,
//! exchanging [`Datagram`]s directly with no framing to get wrong.

use crate::io::{Capabilities, Datagram, IoInterface};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub struct MockTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<Datagram>>>,
    receiver: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    capabilities: Capabilities,
    destroyed: AtomicBool,
}

impl MockTransport {
    /// A byte-stream-shaped pair: `structured_clone`/`transfer` both
    /// false, matching a real transport like a pipe or socket.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        Self::pair_with_capabilities(Capabilities::default())
    }

    /// A pair advertising the given capabilities, for exercising the
    /// structured-clone and transfer code paths.
    pub fn pair_with_capabilities(capabilities: Capabilities) -> (Arc<Self>, Arc<Self>) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Arc::new(Self {
            sender: Mutex::new(Some(tx_a)),
            receiver: Mutex::new(rx_b),
            capabilities,
            destroyed: AtomicBool::new(false),
        });
        let b = Arc::new(Self {
            sender: Mutex::new(Some(tx_b)),
            receiver: Mutex::new(rx_a),
            capabilities,
            destroyed: AtomicBool::new(false),
        });
        (a, b)
    }
}

#[async_trait]
impl IoInterface for MockTransport {
    async fn read(&self) -> Result<Option<Datagram>> {
        Ok(self.receiver.lock().await.recv().await)
    }

    async fn write(&self, datagram: Datagram) -> Result<()> {
        let guard = self.sender.lock().await;
        let sender = guard.as_ref().ok_or_else(|| anyhow!("mock transport destroyed"))?;
        sender.send(datagram).map_err(|_| anyhow!("mock transport peer dropped"))
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Close our own pending read (by closing the receiver) and hang up
    /// our send side (by dropping the sender), so the peer's in-flight
    /// read also resolves once its buffer drains.
    async fn destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.receiver.lock().await.close();
        self.sender.lock().await.take();
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_exchanges_text_datagrams() {
        let (a, b) = MockTransport::pair();
        a.write(Datagram::Text("hello\n".to_string())).await.unwrap();
        match b.read().await.unwrap() {
            Some(Datagram::Text(text)) => assert_eq!(text, "hello\n"),
            other => panic!("unexpected datagram: {other:?}"),
        }
    }

    #[tokio::test]
    async fn destroy_unblocks_pending_read() {
        let (a, b) = MockTransport::pair();
        let reader = tokio::spawn(async move { b.read().await.unwrap() });
        a.destroy().await.unwrap();
        // The peer's read resolves to None once its receiver is closed
        // and drained, rather than hanging forever.
        assert!(reader.await.unwrap().is_none());
    }
}
