//! SQLite backend.
//!
//! Records live in `tasks`, scoped by queue name. The global lock is a row
//! in `locks` carrying an expiry, so a crashed holder cannot wedge the
//! fleet. WAL mode lets several worker processes share one database file.
//!
//! While a `Storage` holds the lock, every write first renews the lock row
//! in the same transaction. A holder whose row expired or was taken over
//! gets [`Error::Lock`] instead of writing behind the new holder's back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::debug;

use super::{Locker, Sorted};
use crate::error::{Error, Result};

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Mutex<Connection>,
    queue: String,
    owner: String,
    /// Set between a successful `acquire` and the next `release`.
    held: AtomicBool,
    /// How long a lock row stays valid without a write or release.
    lock_ttl: Duration,
    /// How long `acquire` waits before giving up.
    lock_timeout: Duration,
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<std::path::Path>, queue: impl Into<String>) -> Result<Self> {
        Self::init(Connection::open(path)?, queue.into())
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(queue: impl Into<String>) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, queue.into())
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn init(conn: Connection, queue: String) -> Result<Self> {
        // WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                queue       TEXT NOT NULL,
                score       INTEGER NOT NULL,
                value       TEXT NOT NULL,
                PRIMARY KEY (queue, score)
            );

            CREATE TABLE IF NOT EXISTS locks (
                name        TEXT PRIMARY KEY,
                owner       TEXT NOT NULL,
                expiry      INTEGER NOT NULL
            );
            ",
        )?;

        debug!(%queue, "sqlite storage opened");

        Ok(Self {
            conn: Mutex::new(conn),
            queue,
            owner: uuid::Uuid::new_v4().to_string(),
            held: AtomicBool::new(false),
            lock_ttl: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(30),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Other("sqlite connection poisoned".into()))
    }

    /// Execute a closure within a SQLite transaction.
    ///
    /// The transaction commits if the closure returns Ok, rolls back on Err.
    fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a write, fenced by the lock row while the lock is held.
    fn write<F>(&self, f: F) -> Result<usize>
    where
        F: FnOnce(&Transaction) -> Result<usize>,
    {
        let fenced = self.held.load(Ordering::SeqCst);
        self.with_transaction(|tx| {
            if fenced {
                self.renew(tx)?;
            }
            f(tx)
        })
    }

    /// Push the lock row's expiry out, failing if it is no longer ours.
    fn renew(&self, tx: &Transaction) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let name = self.lock_name();
        let n = tx.execute(
            "UPDATE locks SET expiry = ?1 WHERE name = ?2 AND owner = ?3 AND expiry > ?4",
            params![now.saturating_add(self.lock_ttl_ms()), name, self.owner, now],
        )?;
        if n == 0 {
            return Err(Error::Lock(format!("{name} lost before write")));
        }
        Ok(())
    }

    fn lock_ttl_ms(&self) -> i64 {
        i64::try_from(self.lock_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    fn lock_name(&self) -> String {
        format!("{}.lock", self.queue)
    }

    fn try_acquire(&self) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expiry = now.saturating_add(self.lock_ttl_ms());
        let name = self.lock_name();

        self.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM locks WHERE name = ?1 AND expiry <= ?2",
                params![name, now],
            )?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO locks (name, owner, expiry) VALUES (?1, ?2, ?3)",
                params![name, self.owner, expiry],
            )?;
            Ok(inserted == 1)
        })
    }
}

impl Sorted for Storage {
    fn insert(&self, score: i64, value: &str) -> Result<()> {
        self.write(|tx| {
            Ok(tx.execute(
                "INSERT INTO tasks (queue, score, value) VALUES (?1, ?2, ?3)",
                params![self.queue, score, value],
            )?)
        })?;
        Ok(())
    }

    fn update(&self, score: i64, value: &str) -> Result<bool> {
        let n = self.write(|tx| {
            Ok(tx.execute(
                "UPDATE tasks SET value = ?1 WHERE queue = ?2 AND score = ?3",
                params![value, self.queue, score],
            )?)
        })?;
        Ok(n == 1)
    }

    fn delete(&self, score: i64) -> Result<bool> {
        let n = self.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM tasks WHERE queue = ?1 AND score = ?2",
                params![self.queue, score],
            )?)
        })?;
        Ok(n == 1)
    }

    fn search(&self, min: i64, max: i64) -> Result<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT score, value FROM tasks
             WHERE queue = ?1 AND score >= ?2 AND score <= ?3
             ORDER BY score ASC",
        )?;

        let rows = stmt
            .query_map(params![self.queue, min, max], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn score(&self, score: i64) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM tasks WHERE queue = ?1 AND score = ?2",
                params![self.queue, score],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

impl Locker for Storage {
    fn acquire(&self) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.try_acquire()? {
                self.held.store(true, Ordering::SeqCst);
                return Ok(());
            }
            if start.elapsed() >= self.lock_timeout {
                return Err(Error::Lock(format!(
                    "timed out after {:?} waiting for {}",
                    self.lock_timeout,
                    self.lock_name()
                )));
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn release(&self) -> Result<()> {
        self.held.store(false, Ordering::SeqCst);
        let n = self.conn()?.execute(
            "DELETE FROM locks WHERE name = ?1 AND owner = ?2",
            params![self.lock_name(), self.owner],
        )?;
        if n == 0 {
            return Err(Error::Lock(format!("{} not held", self.lock_name())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_operations_are_scoped_by_queue() {
        let storage = Storage::in_memory("q1").unwrap();
        storage.insert(2, "b").unwrap();
        storage.insert(1, "a").unwrap();
        assert!(storage.insert(1, "dup").is_err());

        // Same connection, different queue.
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO tasks (queue, score, value) VALUES ('q2', 3, 'c')",
                [],
            )
            .unwrap();

        let all = storage.search(i64::MIN, i64::MAX).unwrap();
        assert_eq!(all, vec![(1, "a".to_string()), (2, "b".to_string())]);

        assert!(storage.update(2, "bb").unwrap());
        assert_eq!(storage.score(2).unwrap().as_deref(), Some("bb"));
        assert!(storage.delete(1).unwrap());
        assert!(!storage.delete(3).unwrap());
        assert_eq!(storage.score(1).unwrap(), None);
    }

    #[test]
    fn lock_is_exclusive_until_released() {
        let storage = Storage::in_memory("q")
            .unwrap()
            .with_lock_timeout(Duration::from_millis(20));

        storage.acquire().unwrap();
        assert!(matches!(storage.acquire(), Err(Error::Lock(_))));
        storage.release().unwrap();
        assert!(storage.release().is_err());
        storage.acquire().unwrap();
        storage.release().unwrap();
    }

    #[test]
    fn writes_after_losing_the_lock_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.db");
        let a = Storage::open(&path, "q")
            .unwrap()
            .with_lock_ttl(Duration::from_millis(50));
        let b = Storage::open(&path, "q").unwrap();

        a.acquire().unwrap();
        a.insert(1, "a").unwrap();
        std::thread::sleep(Duration::from_millis(100));

        b.acquire().unwrap();
        assert!(matches!(a.insert(2, "a"), Err(Error::Lock(_))));
        assert!(matches!(a.update(1, "stale"), Err(Error::Lock(_))));
        assert!(matches!(a.delete(1), Err(Error::Lock(_))));
        assert_eq!(b.score(1).unwrap().as_deref(), Some("a"));
        assert_eq!(b.score(2).unwrap(), None);

        b.update(1, "b").unwrap();
        b.release().unwrap();
        assert!(a.release().is_err());
    }

    #[test]
    fn writes_keep_the_lock_alive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.db");
        let a = Storage::open(&path, "q")
            .unwrap()
            .with_lock_ttl(Duration::from_millis(300));
        let b = Storage::open(&path, "q")
            .unwrap()
            .with_lock_timeout(Duration::from_millis(20));

        a.acquire().unwrap();
        for score in 0..6 {
            std::thread::sleep(Duration::from_millis(100));
            a.insert(score, "a").unwrap();
        }
        assert!(matches!(b.acquire(), Err(Error::Lock(_))));
        a.release().unwrap();
        b.acquire().unwrap();
        b.release().unwrap();
    }

    #[test]
    fn expired_lock_row_is_taken_over() {
        let storage = Storage::in_memory("q").unwrap();
        storage
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO locks (name, owner, expiry) VALUES ('q.lock', 'crashed', 0)",
                [],
            )
            .unwrap();

        storage.acquire().unwrap();
        storage.release().unwrap();
    }
}
