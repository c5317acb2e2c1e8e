use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// A fixed set of resources, each lent to one caller at a time.
///
/// The pool size is the concurrency bound: once every item is checked out,
/// further callers wait until one is returned or their wait expires.
#[derive(Debug)]
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    returned: Condvar,
    capacity: usize,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self {
            idle: Mutex::new(items),
            returned: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items not currently checked out.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Take an item, waiting at most `wait` for one to be returned.
    pub fn checkout(&self, wait: Duration) -> Option<Checkout<'_, T>> {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut idle, _) = self
            .returned
            .wait_timeout_while(idle, wait, |idle| idle.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        idle.pop().map(|item| Checkout {
            pool: self,
            item: Some(item),
        })
    }

    fn give_back(&self, item: T) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        self.returned.notify_one();
    }
}

/// Exclusive access to one pooled item; returns it to the pool on drop,
/// including during unwinding.
pub struct Checkout<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Checkout<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("item is held until drop")
    }
}

impl<T> DerefMut for Checkout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item is held until drop")
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}
