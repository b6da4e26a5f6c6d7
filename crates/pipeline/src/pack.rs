//! The message envelope

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use strom_protocol::Message;

/// Shared handle to a pipeline pack
///
/// The `Arc` is the sharing mechanism; ownership for the purpose of the
/// recycle discipline is tracked by the pack's own reference count, which
/// the router establishes before fan-out.
pub type Pack = Arc<PipelinePack>;

/// Reference-counted message envelope
///
/// A pack is owned by exactly one component at any instant, except between
/// router fan-out and the final recycle, during which the message is
/// read-only. The message lock enforces that discipline at runtime; writers
/// only exist while the logical reference count is 1.
pub struct PipelinePack {
    /// The decoded record
    message: RwLock<Message>,

    /// Raw wire bytes for packs that have not been decoded yet
    raw: RwLock<Vec<u8>>,

    /// Number of consumers that still have to recycle this pack
    ref_count: AtomicU32,
}

impl PipelinePack {
    pub(crate) fn new() -> Self {
        Self {
            message: RwLock::new(Message::default()),
            raw: RwLock::new(Vec::new()),
            ref_count: AtomicU32::new(0),
        }
    }

    /// Read access to the message
    pub fn message(&self) -> RwLockReadGuard<'_, Message> {
        self.message.read()
    }

    /// Write access to the message; callers hold this only while they are
    /// the pack's sole owner (before router fan-out)
    pub fn message_mut(&self) -> RwLockWriteGuard<'_, Message> {
        self.message.write()
    }

    /// Replace the message wholesale
    pub fn set_message(&self, msg: Message) {
        *self.message.write() = msg;
    }

    /// Undecoded wire bytes, if an input stored any
    pub fn raw(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.raw.read()
    }

    pub fn set_raw(&self, bytes: Vec<u8>) {
        *self.raw.write() = bytes;
    }

    /// Move the raw bytes out, leaving the slot empty
    pub fn take_raw(&self) -> Vec<u8> {
        std::mem::take(&mut *self.raw.write())
    }

    /// Current logical reference count
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_ref_count(&self, n: u32) {
        self.ref_count.store(n, Ordering::Release);
    }

    /// Decrement and return the previous value; 0 means a double recycle
    pub(crate) fn dec_ref_count(&self) -> u32 {
        let prev = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Undo the underflow so the damage does not compound.
            self.ref_count.store(0, Ordering::Release);
        }
        prev
    }

    /// Zero every payload slot before the pack re-enters the free list
    pub(crate) fn reset(&self) {
        self.message.write().clear();
        self.raw.write().clear();
    }
}

impl std::fmt::Debug for PipelinePack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinePack")
            .field("ref_count", &self.ref_count())
            .field("type", &self.message().msg_type())
            .finish()
    }
}
