//! Transport abstraction (spec §4.1, `IoInterface`).
//!
//! An adapter is either string-oriented (one JSON document per datagram)
//! or structured-clone-oriented (a [`WireEnvelope`] plus a list of opaque
//! transferable handles). The channel picks between the two encodings
//! based on [`Capabilities`] (spec §4.2, §9 "structured-clone vs.
//! byte-stream duality").
//!
//! Concrete adapters (stdio, WebSocket, Worker, Electron IPC, ...) are
//! deliberately out of scope for this crate (spec §1) — this module only
//! defines the contract external transports must satisfy.

use crate::message::WireEnvelope;
use anyhow::Result;
use async_trait::async_trait;

/// Capability flags a transport advertises (spec §4.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The transport can carry a [`WireEnvelope`] directly, without
    /// string framing.
    pub structured_clone: bool,
    /// The transport can move native transferable handles alongside a
    /// structured-clone payload without copying.
    pub transfer: bool,
}

/// A single datagram read from or written to a transport.
#[derive(Debug, Clone)]
pub enum Datagram {
    /// A single JSON document (string-mode transports); may be a partial
    /// line, reassembled by the channel's framing buffer (spec §4.5).
    Text(String),
    /// A structured-clone envelope plus the native handles that travel
    /// out-of-band with it.
    Object {
        envelope: WireEnvelope,
        transfers: Vec<TransferHandle>,
    },
}

/// An opaque native transferable handle. Concrete transports define what
/// this actually holds (an `ArrayBuffer`, a file descriptor, ...); the
/// core only ever moves it around without inspecting it.
#[derive(Debug, Clone)]
pub struct TransferHandle(pub Vec<u8>);

/// The transport contract every adapter implements (spec §4.1, §6).
///
/// `read` cooperatively suspends until a datagram is available or the
/// transport is destroyed; returning `Ok(None)` means "nothing right now,
/// call me again" and the reader loop simply iterates.
#[async_trait]
pub trait IoInterface: Send + Sync {
    /// Read a single datagram.
    async fn read(&self) -> Result<Option<Datagram>>;

    /// Write a single datagram.
    async fn write(&self, datagram: Datagram) -> Result<()>;

    /// Capabilities this transport advertises.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Release resources and unblock any pending `read` (spec §4.5
    /// "Destruction").
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }

    /// Request graceful shutdown without necessarily unblocking `read`
    /// immediately.
    async fn signal_destroy(&self) -> Result<()> {
        Ok(())
    }

    /// True once `destroy` has completed; the reader loop checks this
    /// before each iteration (spec §4.5).
    fn is_destroyed(&self) -> bool {
        false
    }
}
