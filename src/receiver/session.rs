//! Upload sessions of multi-chunk files.
//!
//! A session is created by chunk 0 and keyed by the id of the file it
//! writes to. It remembers what the next chunk must look like so that
//! chunks are appended strictly in order, exactly once. The receiver drops
//! a session as soon as its file is finalised; the sweeper drops the ones
//! that go idle before that.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// State of one multi-chunk upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Destination file id.
    pub file_id: String,
    /// Container the file lives in.
    pub container_id: String,
    /// Name given to the file once complete.
    pub final_name: String,
    /// Number of chunks announced by chunk 0.
    pub total_chunks: usize,
    /// Index the next appended chunk must carry.
    pub next_expected: usize,
    /// Bytes stored so far.
    pub bytes_written: u64,
    /// Length of the last appended chunk.
    pub last_chunk_len: usize,
    /// Public link, set once the file is finalised.
    pub file_url: Option<String>,
    /// Time of the last accepted chunk.
    pub last_activity: Instant,
    expired: bool,
}

impl UploadSession {
    /// Session after chunk 0 of `total_chunks` was stored.
    pub fn new(
        file_id: impl Into<String>,
        container_id: impl Into<String>,
        final_name: impl Into<String>,
        total_chunks: usize,
        first_chunk_len: usize,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            container_id: container_id.into(),
            final_name: final_name.into(),
            total_chunks,
            next_expected: 1,
            bytes_written: first_chunk_len as u64,
            last_chunk_len: first_chunk_len,
            file_url: None,
            last_activity: Instant::now(),
            expired: false,
        }
    }

    /// True once the last chunk was stored.
    pub fn is_finalized(&self) -> bool {
        self.file_url.is_some()
    }

    /// True if the sweeper dropped this session.
    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// True if `chunk_index` with `len` bytes repeats the last appended chunk.
    pub fn is_replay(&self, chunk_index: usize, len: usize) -> bool {
        chunk_index + 1 == self.next_expected && len == self.last_chunk_len
    }

    /// Records an appended chunk.
    pub fn record_chunk(&mut self, len: usize, new_size: u64) {
        self.next_expected += 1;
        self.last_chunk_len = len;
        self.bytes_written = new_size;
        self.touch();
    }

    /// Marks activity now.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= idle_timeout
    }
}

/// Shared handle to a session.
pub type SessionHandle = Arc<tokio::sync::Mutex<UploadSession>>;

/// Live upload sessions by file id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Idle time after which a session is dropped.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Registers a session, replacing any with the same file id.
    pub fn insert(&self, session: UploadSession) -> SessionHandle {
        let file_id = session.file_id.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        self.sessions.lock().insert(file_id, handle.clone());
        handle
    }

    /// Session of a file.
    pub fn get(&self, file_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().get(file_id).cloned()
    }

    /// Drops the session of a file.
    pub fn remove(&self, file_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().remove(file_id)
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drops sessions idle for at least the idle timeout.
    ///
    /// Sessions busy with a chunk are skipped. Returns the file ids of
    /// dropped sessions that never completed; their partial files stay in
    /// storage.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let mut abandoned = Vec::new();
        let mut sessions = self.sessions.lock();

        sessions.retain(|file_id, handle| {
            let Ok(mut session) = handle.try_lock() else {
                return true;
            };
            if !session.is_idle(now, self.idle_timeout) {
                return true;
            }
            session.expired = true;
            if session.is_finalized() {
                debug!(file_id = %file_id, "Dropping finalised upload session");
            } else {
                warn!(
                    file_id = %file_id,
                    container_id = %session.container_id,
                    received_chunks = session.next_expected,
                    total_chunks = session.total_chunks,
                    bytes_written = session.bytes_written,
                    "Upload session expired; partial file left in place"
                );
                abandoned.push(file_id.clone());
            }
            false
        });

        abandoned
    }

    /// Sweeps every `interval` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let abandoned = registry.sweep_expired(Instant::now());
                if !abandoned.is_empty() {
                    info!(count = abandoned.len(), "Expired abandoned upload sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(file_id: &str) -> UploadSession {
        UploadSession::new(file_id, "folder-1", "articles_0.pdf", 4, 100)
    }

    #[test]
    fn test_replay_detection() {
        let mut s = session("f1");
        assert!(s.is_replay(0, 100));
        assert!(!s.is_replay(0, 99));
        assert!(!s.is_replay(1, 100));

        s.record_chunk(100, 200);
        assert_eq!(s.next_expected, 2);
        assert!(s.is_replay(1, 100));
        assert!(!s.is_replay(0, 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expires_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let idle = registry.insert(session("idle"));
        registry.insert(session("done")).lock().await.file_url = Some("http://x/files/done".into());

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = registry.insert(session("fresh"));

        tokio::time::advance(Duration::from_secs(31)).await;
        let abandoned = registry.sweep_expired(Instant::now());

        assert_eq!(abandoned, vec!["idle".to_string()]);
        assert!(idle.lock().await.is_expired());
        assert!(!fresh.lock().await.is_expired());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_busy_session() {
        let registry = SessionRegistry::new(Duration::from_secs(1));
        let handle = registry.insert(session("busy"));
        let _guard = handle.lock().await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(registry.sweep_expired(Instant::now()).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(10)));
        registry.insert(session("f1"));
        let task = registry.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(registry.is_empty());
        task.abort();
    }
}
