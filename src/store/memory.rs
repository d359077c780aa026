//! In-process backend. Engines sharing one `Arc<Memory>` behave like
//! workers sharing one remote store.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use super::{Locker, Sorted};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct Memory {
    data: Mutex<BTreeMap<i64, String>>,
    held: Mutex<bool>,
    freed: Condvar,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> Result<MutexGuard<'_, BTreeMap<i64, String>>> {
        self.data
            .lock()
            .map_err(|_| Error::Other("memory store poisoned".into()))
    }
}

impl Sorted for Memory {
    fn insert(&self, score: i64, value: &str) -> Result<()> {
        let mut data = self.data()?;
        if data.contains_key(&score) {
            return Err(Error::Other(format!("score {score} already exists")));
        }
        data.insert(score, value.to_string());
        Ok(())
    }

    fn update(&self, score: i64, value: &str) -> Result<bool> {
        let mut data = self.data()?;
        match data.get_mut(&score) {
            Some(v) => {
                *v = value.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, score: i64) -> Result<bool> {
        Ok(self.data()?.remove(&score).is_some())
    }

    fn search(&self, min: i64, max: i64) -> Result<Vec<(i64, String)>> {
        if min > max {
            return Ok(Vec::new());
        }
        Ok(self
            .data()?
            .range(min..=max)
            .map(|(s, v)| (*s, v.clone()))
            .collect())
    }
}

impl Locker for Memory {
    fn acquire(&self) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| Error::Lock("memory lock poisoned".into()))?;
        while *held {
            held = self
                .freed
                .wait(held)
                .map_err(|_| Error::Lock("memory lock poisoned".into()))?;
        }
        *held = true;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| Error::Lock("memory lock poisoned".into()))?;
        if !*held {
            return Err(Error::Lock("release without acquire".into()));
        }
        *held = false;
        self.freed.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn sorted_ranges_ascend() {
        let m = Memory::new();
        m.insert(3, "c").unwrap();
        m.insert(1, "a").unwrap();
        m.insert(2, "b").unwrap();
        assert!(m.insert(2, "x").is_err());

        let all: Vec<i64> = m.search(i64::MIN, i64::MAX).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(all, vec![1, 2, 3]);
        assert_eq!(m.score(2).unwrap().as_deref(), Some("b"));

        assert!(m.update(2, "bb").unwrap());
        assert!(!m.update(9, "z").unwrap());
        assert_eq!(m.score(2).unwrap().as_deref(), Some("bb"));

        assert!(m.delete(2).unwrap());
        assert!(!m.delete(2).unwrap());
        assert_eq!(m.score(2).unwrap(), None);
    }

    #[test]
    fn release_without_acquire_fails() {
        assert!(Memory::new().release().is_err());
    }

    #[test]
    fn lock_serializes_threads() {
        let m = Arc::new(Memory::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let m = Arc::clone(&m);
            let inside = Arc::clone(&inside);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    m.acquire().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    m.release().unwrap();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
    }
}
