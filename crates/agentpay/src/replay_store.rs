//! Consumed-proof records: the table that makes every `txRef` buy access at
//! most once.

use dashmap::DashMap;
#[cfg(feature = "full")]
use std::sync::Mutex;
use std::time::Instant;

/// Backend for replay protection, keyed by ledger transaction reference.
///
/// Implementations must be thread-safe and must make [`try_consume`](Self::try_consume)
/// atomic: two concurrent calls for the same `tx_ref` never both return `true`.
pub trait ReplayStore: Send + Sync {
    /// Whether `tx_ref` has already been consumed.
    fn is_consumed(&self, tx_ref: &str) -> bool;

    /// Atomically record `tx_ref` as consumed if it was not already.
    /// Returns `true` if this call claimed it, `false` on replay.
    fn try_consume(&self, tx_ref: &str) -> bool;

    /// Drop records older than `max_age_secs`. Returns the number removed.
    ///
    /// Only safe once no challenge that a purged proof could satisfy is
    /// still live; callers pick `max_age_secs` well past the challenge TTL.
    fn purge_older_than(&self, max_age_secs: u64) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transaction references are case-insensitive hex on EVM ledgers; fold case
/// so `0xABC` and `0xabc` are one key.
fn normalize(tx_ref: &str) -> String {
    tx_ref.trim().to_ascii_lowercase()
}

/// In-memory store backed by DashMap. Fast, but forgets everything on
/// restart, so a restarted verifier would accept old proofs again.
#[derive(Default)]
pub struct InMemoryReplayStore {
    consumed: DashMap<String, Instant>,
}

impl InMemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayStore for InMemoryReplayStore {
    fn is_consumed(&self, tx_ref: &str) -> bool {
        self.consumed.contains_key(&normalize(tx_ref))
    }

    fn try_consume(&self, tx_ref: &str) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.consumed.entry(normalize(tx_ref)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(Instant::now());
                true
            }
        }
    }

    fn purge_older_than(&self, max_age_secs: u64) -> usize {
        let before = self.consumed.len();
        self.consumed
            .retain(|_, consumed_at| consumed_at.elapsed().as_secs() < max_age_secs);
        before.saturating_sub(self.consumed.len())
    }

    fn len(&self) -> usize {
        self.consumed.len()
    }
}

/// Persistent store backed by SQLite. Survives restarts, and the primary key
/// makes `try_consume` atomic across processes sharing the file.
#[cfg(feature = "full")]
pub struct SqliteReplayStore {
    conn: Mutex<rusqlite::Connection>,
}

#[cfg(feature = "full")]
impl SqliteReplayStore {
    /// Open (or create) the replay database at `path`.
    ///
    /// On Unix the file is restricted to 0600.
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS consumed_proofs (
                tx_ref TEXT PRIMARY KEY,
                consumed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_consumed_at ON consumed_proofs(consumed_at);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to restrict replay database permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("replay store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Clock errors map to i64::MAX so records written then are never purged.
#[cfg(feature = "full")]
fn unix_now_i64() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(i64::MAX)
}

#[cfg(feature = "full")]
impl ReplayStore for SqliteReplayStore {
    fn is_consumed(&self, tx_ref: &str) -> bool {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM consumed_proofs WHERE tx_ref = ?1",
                [normalize(tx_ref)],
                |row| row.get(0),
            )
            // Fail closed: a read error counts as consumed.
            .unwrap_or(1);
        count > 0
    }

    fn try_consume(&self, tx_ref: &str) -> bool {
        // PRIMARY KEY conflict (or any write error) means not claimed.
        self.conn()
            .execute(
                "INSERT INTO consumed_proofs (tx_ref, consumed_at) VALUES (?1, ?2)",
                rusqlite::params![normalize(tx_ref), unix_now_i64()],
            )
            .is_ok()
    }

    fn purge_older_than(&self, max_age_secs: u64) -> usize {
        let conn = self.conn();
        let now = unix_now_i64();

        // A backward clock jump would make fresh records look old to a later
        // purge once the clock recovers; skip until it does.
        let newest: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(consumed_at), 0) FROM consumed_proofs",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if newest > now {
            tracing::warn!(now, newest, "clock behind newest replay record, skipping purge");
            return 0;
        }

        let cutoff = now.saturating_sub(i64::try_from(max_age_secs).unwrap_or(i64::MAX));
        conn.execute(
            "DELETE FROM consumed_proofs WHERE consumed_at < ?1",
            rusqlite::params![cutoff],
        )
        .unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.conn()
            .query_row("SELECT COUNT(*) FROM consumed_proofs", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| usize::try_from(n).unwrap_or(0))
            .unwrap_or(0)
    }
}
