//! The queue engine.
//!
//! An [`Engine`] is one worker's handle on a shared queue. Every operation
//! takes the backend's global lock exactly once, reads the full ordered
//! record list, applies its state transition and writes back before the
//! lock is released. Engines built over the same store cooperate; nothing
//! else is shared between them.

mod create;
mod delete;
mod expire;
mod extend;
mod lister;
mod local;
mod search;
mod ticker;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use opentelemetry::KeyValue;
use tracing::{Span, info, warn};

use crate::balancer::{Balancer, Fairness};
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::store::{Locker, Memory, Sorted, Storage};
use crate::task::{ObjectId, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::start_operation_span;
use crate::timer::{System, Timer};

use self::local::Local;

/// Collaborators and identity for one [`Engine`].
pub struct EngineConfig {
    store: Arc<dyn Sorted>,
    locker: Arc<dyn Locker>,
    balancer: Arc<dyn Balancer>,
    timer: Arc<dyn Timer>,
    worker: String,
    ttl: TimeDelta,
    retention: TimeDelta,
    queue: String,
}

impl EngineConfig {
    pub fn new(store: Arc<dyn Sorted>, locker: Arc<dyn Locker>) -> Self {
        Self {
            store,
            locker,
            balancer: Arc::new(Fairness),
            timer: Arc::new(System),
            worker: config::random_worker(),
            ttl: TimeDelta::seconds(30),
            retention: TimeDelta::hours(1),
            queue: "rescue".to_string(),
        }
    }

    /// Store and lock backed by the same in-process [`Memory`].
    pub fn memory(memory: Arc<Memory>) -> Self {
        Self::new(memory.clone(), memory)
    }

    pub fn balancer(mut self, balancer: Arc<dyn Balancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    /// Lease duration granted by search and extend.
    pub fn ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    /// How long a broadcast stays in the store before expire removes it.
    pub fn retention(mut self, retention: TimeDelta) -> Self {
        self.retention = retention;
        self
    }

    /// Only used to label telemetry; the store decides the namespace.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }
}

pub struct Engine {
    store: Arc<dyn Sorted>,
    locker: Arc<dyn Locker>,
    balancer: Arc<dyn Balancer>,
    timer: Arc<dyn Timer>,
    worker: String,
    ttl: TimeDelta,
    retention: TimeDelta,
    queue: String,
    /// Broadcasts created before this engine existed are not delivered to it.
    pointer: ObjectId,
    local: Mutex<Local>,
    last: Mutex<i64>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let pointer = ObjectId(nanos(config.timer.now()));
        info!(
            worker = %config.worker,
            queue = %config.queue,
            ttl_secs = config.ttl.num_seconds(),
            "engine started"
        );
        Self {
            store: config.store,
            locker: config.locker,
            balancer: config.balancer,
            timer: config.timer,
            worker: config.worker,
            ttl: config.ttl,
            retention: config.retention,
            queue: config.queue,
            pointer,
            local: Mutex::new(Local::default()),
            last: Mutex::new(0),
        }
    }

    /// Standalone engine over a private in-process store.
    pub fn in_memory() -> Self {
        Self::new(EngineConfig::memory(Arc::new(Memory::new())))
    }

    /// Engine over the backend named by `config`: SQLite when a database
    /// path is set, process memory otherwise.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = match &config.database {
            Some(path) => {
                let storage = Arc::new(Storage::open(path, config.queue.clone())?);
                EngineConfig::new(storage.clone(), storage)
            }
            None => EngineConfig::memory(Arc::new(Memory::new())),
        };
        Ok(Self::new(
            engine
                .balancer(config.balancer.build())
                .worker(config.worker.clone())
                .ttl(config.ttl())
                .retention(config.retention())
                .queue(config.queue.clone()),
        ))
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run `f` while holding the global lock.
    ///
    /// The lock is released on every path, unwinding included. A release
    /// failure is logged and never replaces the result of `f`.
    fn locked<T>(&self, operation: &'static str, f: impl FnOnce(&Span) -> Result<T>) -> Result<T> {
        let span = start_operation_span(operation, &self.queue, &self.worker);
        let _enter = span.enter();
        let start = Instant::now();

        self.locker.acquire()?;
        let held = Held {
            locker: &*self.locker,
            operation,
        };
        let result = f(&span);
        drop(held);

        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("queue", self.queue.clone()),
                KeyValue::new("operation", operation),
            ],
        );
        result
    }

    fn queue_attr(&self) -> [KeyValue; 1] {
        [KeyValue::new("queue", self.queue.clone())]
    }

    fn local(&self) -> Result<MutexGuard<'_, Local>> {
        self.local
            .lock()
            .map_err(|_| Error::Other("local delivery cache poisoned".into()))
    }

    /// Every stored task in object order.
    fn list(&self) -> Result<Vec<Task>> {
        self.store
            .search(i64::MIN, i64::MAX)?
            .into_iter()
            .map(|(_, raw)| Task::decode(&raw))
            .collect()
    }

    fn find(&self, object: ObjectId) -> Result<Option<Task>> {
        self.store
            .score(object.0)?
            .map(|raw| Task::decode(&raw))
            .transpose()
    }

    fn insert(&self, task: &Task) -> Result<()> {
        let object = task
            .object()
            .ok_or_else(|| Error::Other("refusing to store a task without object id".into()))?;
        self.store.insert(object.0, &task.encode()?)
    }

    fn update(&self, task: &Task) -> Result<()> {
        let object = task
            .object()
            .ok_or_else(|| Error::Other("refusing to store a task without object id".into()))?;
        if !self.store.update(object.0, &task.encode()?)? {
            return Err(Error::Other(format!("task {object} vanished under lock")));
        }
        Ok(())
    }

    fn remove(&self, object: ObjectId) -> Result<bool> {
        self.store.delete(object.0)
    }

    /// Allocate a fresh object id: the creation time in nanoseconds, pushed
    /// past anything already issued or stored so ids stay unique and ordered.
    fn next_object(&self, now: DateTime<Utc>) -> Result<ObjectId> {
        let now = nanos(now);
        let newest = self
            .store
            .search(now, i64::MAX)?
            .last()
            .map_or(i64::MIN, |(score, _)| *score);

        let mut last = self
            .last
            .lock()
            .map_err(|_| Error::Other("object id allocator poisoned".into()))?;
        let id = now
            .max(newest.saturating_add(1))
            .max(last.saturating_add(1));
        *last = id;
        Ok(ObjectId(id))
    }
}

/// Releases the global lock when dropped.
struct Held<'a> {
    locker: &'a dyn Locker,
    operation: &'static str,
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.locker.release() {
            warn!(operation = self.operation, error = %e, "failed to release lock");
        }
    }
}

fn nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}
