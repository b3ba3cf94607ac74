// Copyright 2025 The ocabox-server Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FIFO pool of reusable items with bounded waiting.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;

/// One permit per item in `items`.
#[derive(Debug)]
pub(crate) struct Pool<T> {
    items: Mutex<VecDeque<T>>,
    available: Semaphore,
}

impl<T> Pool<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    pub(crate) fn put(&self, item: T) {
        if let Ok(mut items) = self.items.lock() {
            items.push_back(item);
            self.available.add_permits(1);
        }
    }

    /// Take the oldest item, waiting at most `wait` for one to be returned.
    ///
    /// The item goes back to the pool when the lease is dropped, including
    /// when the holder is cancelled.
    pub(crate) async fn take(&self, wait: Duration) -> Option<Lease<'_, T>> {
        let permit = timeout(wait, self.available.acquire()).await.ok()?.ok()?;
        permit.forget();
        let item = self.items.lock().ok()?.pop_front()?;
        Some(Lease {
            pool: self,
            item: Some(item),
        })
    }

    /// Remove every idle item.
    pub(crate) fn drain(&self) -> Vec<T> {
        let Ok(mut items) = self.items.lock() else {
            return Vec::new();
        };
        self.available.forget_permits(items.len());
        items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}

/// An item borrowed from a [`Pool`].
#[derive(Debug)]
pub(crate) struct Lease<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Lease<'_, T> {
    /// Keep the item instead of returning it.
    pub(crate) fn detach(mut self) -> Option<T> {
        self.item.take()
    }
}

impl<T> Deref for Lease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `detach` empties the slot, and it consumes the lease
        self.item.as_ref().unwrap_or_else(|| unreachable!("lease already detached"))
    }
}

impl<T> DerefMut for Lease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("lease already detached"))
    }
}

impl<T> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let pool = Pool::new();
        pool.put(1);
        pool.put(2);
        let first = pool.take(Duration::from_millis(10)).await.unwrap();
        let second = pool.take(Duration::from_millis(10)).await.unwrap();
        assert_eq!((*first, *second), (1, 2));
    }

    #[tokio::test]
    async fn test_take_times_out_when_empty() {
        let pool: Pool<u32> = Pool::new();
        assert!(pool.take(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_waiter_gets_returned_item() {
        let pool = Arc::new(Pool::new());
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.take(Duration::from_secs(2)).await.and_then(Lease::detach)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.put("conn");
        assert_eq!(waiter.await.unwrap(), Some("conn"));
    }

    #[tokio::test]
    async fn test_drain_empties_pool() {
        let pool = Pool::new();
        pool.put('a');
        pool.put('b');
        assert_eq!(pool.drain(), vec!['a', 'b']);
        assert_eq!(pool.len(), 0);
        assert!(pool.take(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_lease_returns_item() {
        let pool = Pool::new();
        pool.put(7u32);
        {
            let lease = pool.take(Duration::from_millis(10)).await.unwrap();
            assert_eq!(*lease, 7);
            assert_eq!(pool.len(), 0);
        }
        assert_eq!(pool.len(), 1);

        let detached = pool.take(Duration::from_millis(10)).await.unwrap().detach();
        assert_eq!(detached, Some(7));
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_holder_returns_item() {
        let pool = Pool::new();
        pool.put("session");
        let held = tokio::time::timeout(Duration::from_millis(20), async {
            let _lease = pool.take(Duration::from_millis(10)).await;
            std::future::pending::<()>().await;
        })
        .await;
        assert!(held.is_err());
        assert_eq!(pool.len(), 1);
    }
}
