use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

/// The transport a client session was accepted over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Plain, unencrypted TCP.
    Plain,
    /// TLS-wrapped TCP.
    Tls,
}

/// Milliseconds since the Unix epoch, used as the monotonic-enough clock for
/// `last_activity` / `start_activity`. `SystemTime` rather than `Instant` so
/// the value is comparable across process-wide snapshots and trivially
/// loggable; the set-via-compare-exchange pattern in [`ClientSession::touch_activity`]
/// keeps the "only increases" invariant even if the wall clock briefly steps
/// backward.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Per-client state held by the [`crate::ConnectionRegistry`] for the
/// lifetime of a connection (§3's "Client session").
pub struct ClientSession {
    /// Unique, monotonically assigned client id.
    pub id: u32,
    /// Transport the client connected over.
    pub transport: Transport,
    /// Per-client directory for received files (`Client<id>` by default).
    pub file_path: PathBuf,

    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    file_bytes_received: AtomicU64,
    file_bytes_sent: AtomicU64,
    recv_count: AtomicU64,
    send_count: AtomicU64,
    recv_file_count: AtomicU64,
    send_file_count: AtomicU64,

    seq: AtomicU32,
    unique_id: OnceLock<String>,

    last_activity_millis: AtomicU64,
    start_activity_millis: u64,
    connected: AtomicBool,

    /// Cancelled by the heartbeat monitor (or any other disconnect path) to
    /// signal the connection's read/write tasks to tear down.
    pub cancel: CancellationToken,
}

impl ClientSession {
    pub(crate) fn new(id: u32, transport: Transport, file_path: PathBuf) -> Self {
        let now = now_millis();
        ClientSession {
            id,
            transport,
            file_path,
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            file_bytes_received: AtomicU64::new(0),
            file_bytes_sent: AtomicU64::new(0),
            recv_count: AtomicU64::new(0),
            send_count: AtomicU64::new(0),
            recv_file_count: AtomicU64::new(0),
            send_file_count: AtomicU64::new(0),
            seq: AtomicU32::new(0),
            unique_id: OnceLock::new(),
            last_activity_millis: AtomicU64::new(now),
            start_activity_millis: now,
            connected: AtomicBool::new(true),
            cancel: CancellationToken::new(),
        }
    }

    /// Records that `len` bytes were received (application traffic).
    pub fn record_received(&self, len: u64) {
        self.bytes_received.fetch_add(len, Ordering::Relaxed);
        self.recv_count.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    /// Records that `len` bytes were sent (application traffic).
    pub fn record_sent(&self, len: u64) {
        self.bytes_sent.fetch_add(len, Ordering::Relaxed);
        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    /// Records that `len` file bytes were received.
    pub fn record_file_received(&self, len: u64) {
        self.file_bytes_received.fetch_add(len, Ordering::Relaxed);
        self.recv_file_count.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    /// Records that `len` file bytes were sent.
    pub fn record_file_sent(&self, len: u64) {
        self.file_bytes_sent.fetch_add(len, Ordering::Relaxed);
        self.send_file_count.fetch_add(1, Ordering::Relaxed);
        self.touch_activity();
    }

    /// Returns and increments the session's outbound sequence counter.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Sets `uniqueId` if not already set. Returns `true` if this call set it.
    pub fn set_unique_id(&self, unique_id: String) -> bool {
        self.unique_id.set(unique_id).is_ok()
    }

    /// The peer-supplied routing identifier, if set.
    #[must_use]
    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.get().map(String::as_str)
    }

    /// Advances `last_activity` to the current time, never moving it
    /// backward even under concurrent calls.
    pub fn touch_activity(&self) {
        let now = now_millis();
        let mut observed = self.last_activity_millis.load(Ordering::Relaxed);
        while now > observed {
            match self.last_activity_millis.compare_exchange_weak(
                observed,
                now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => observed = current,
            }
        }
    }

    /// Milliseconds since the Unix epoch at which this session last saw
    /// activity.
    #[must_use]
    pub fn last_activity_millis(&self) -> u64 {
        self.last_activity_millis.load(Ordering::Relaxed)
    }

    /// Milliseconds since the Unix epoch at which this session was created.
    #[must_use]
    pub fn start_activity_millis(&self) -> u64 {
        self.start_activity_millis
    }

    /// True while the session is considered connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Marks the session as disconnected and cancels its token, signalling
    /// any owning connection task to tear down its socket.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }

    /// Snapshot of the eight wire-visible counters, in declaration order.
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            file_bytes_received: self.file_bytes_received.load(Ordering::Relaxed),
            file_bytes_sent: self.file_bytes_sent.load(Ordering::Relaxed),
            recv_count: self.recv_count.load(Ordering::Relaxed),
            send_count: self.send_count.load(Ordering::Relaxed),
            recv_file_count: self.recv_file_count.load(Ordering::Relaxed),
            send_file_count: self.send_file_count.load(Ordering::Relaxed),
        }
    }
}

/// A consistent-per-field, not-cross-field-atomic snapshot of a session's
/// counters (§4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SessionCounters {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub file_bytes_received: u64,
    pub file_bytes_sent: u64,
    pub recv_count: u64,
    pub send_count: u64,
    pub recv_file_count: u64,
    pub send_file_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let session = ClientSession::new(1, Transport::Plain, PathBuf::from("/tmp/x"));
        session.record_received(100);
        session.record_sent(50);
        let counters = session.counters();
        assert_eq!(counters.bytes_received, 100);
        assert_eq!(counters.bytes_sent, 50);
        assert_eq!(counters.recv_count, 1);
        assert_eq!(counters.send_count, 1);
    }

    #[test]
    fn touch_activity_never_decreases() {
        let session = ClientSession::new(1, Transport::Plain, PathBuf::from("/tmp/x"));
        let first = session.last_activity_millis();
        session.touch_activity();
        let second = session.last_activity_millis();
        assert!(second >= first);
    }

    #[test]
    fn disconnect_cancels_token_and_flips_connected() {
        let session = ClientSession::new(1, Transport::Plain, PathBuf::from("/tmp/x"));
        assert!(session.is_connected());
        session.disconnect();
        assert!(!session.is_connected());
        assert!(session.cancel.is_cancelled());
    }

    #[test]
    fn next_seq_increments_and_returns_previous_value() {
        let session = ClientSession::new(1, Transport::Plain, PathBuf::from("/tmp/x"));
        assert_eq!(session.next_seq(), 0);
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
    }
}
