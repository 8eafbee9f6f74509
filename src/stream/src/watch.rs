// Copyright 2026 Weir Labs
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

//! Live subscribers observing fired windows.
//!
//! The view holds watchers weakly; each watcher owns a bounded queue of
//! `(block, watermark)` entries. A watcher that cannot keep up loses the
//! oldest entries, never liveness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;
use weir_common::array::Block;
use weir_common::catalog::Schema;

/// Entries a slow watcher may buffer before losing history.
const WATCH_QUEUE_CAPACITY: usize = 1024;

struct WatcherInner {
    header: Schema,
    queue: Mutex<VecDeque<(Block, u32)>>,
    notify: Notify,
    /// Subscriber observes watermarks only; pushed blocks are emptied.
    events_only: bool,
    last_watermark: AtomicU32,
    closed: AtomicBool,
}

impl WatcherInner {
    fn push(&self, block: Block, watermark: u32) {
        let mut queue = self.queue.lock();
        if queue.len() >= WATCH_QUEUE_CAPACITY {
            queue.pop_front();
            warn!(watermark, "watch subscriber cannot keep up, dropping oldest block");
        }
        queue.push_back((block, watermark));
        drop(queue);
        self.last_watermark.store(watermark, Ordering::Release);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Registry of live watchers, owned by the view. Expired entries are pruned
/// by the cleanup task.
#[derive(Default)]
pub(crate) struct WatcherRegistry {
    watchers: Mutex<Vec<Weak<WatcherInner>>>,
}

impl WatcherRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        header: Schema,
        heartbeat: Duration,
        limit: Option<u64>,
        events_only: bool,
    ) -> WatchStream {
        let inner = Arc::new(WatcherInner {
            header,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            events_only,
            last_watermark: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        self.watchers.lock().push(Arc::downgrade(&inner));
        WatchStream {
            inner,
            heartbeat,
            remaining: limit,
        }
    }

    /// Push a fired block to every live watcher.
    pub(crate) fn push_block(&self, block: &Block, watermark: u32) {
        for watcher in self.watchers.lock().iter() {
            if let Some(watcher) = watcher.upgrade() {
                let entry = if watcher.events_only {
                    Block::empty(watcher.header.clone())
                } else {
                    block.clone()
                };
                watcher.push(entry, watermark);
            }
        }
    }

    pub(crate) fn has_live(&self) -> bool {
        self.watchers.lock().iter().any(|w| w.strong_count() > 0)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.watchers.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub(crate) fn prune_expired(&self) {
        self.watchers.lock().retain(|w| w.strong_count() > 0);
    }

    pub(crate) fn close_all(&self) {
        for watcher in self.watchers.lock().iter() {
            if let Some(watcher) = watcher.upgrade() {
                watcher.close();
            }
        }
    }
}

/// Pull handle of one watch subscription.
pub struct WatchStream {
    inner: Arc<WatcherInner>,
    heartbeat: Duration,
    /// Remaining data entries when the subscription carries a LIMIT.
    remaining: Option<u64>,
}

impl WatchStream {
    /// Next `(block, watermark)` entry. Heartbeats are empty blocks carrying
    /// the latest watermark, emitted when no fire arrives within the
    /// heartbeat interval; they do not count against the limit. Returns
    /// `None` once the limit is exhausted or the view shuts down.
    pub async fn recv(&mut self) -> Option<(Block, u32)> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            if let Some(entry) = self.inner.queue.lock().pop_front() {
                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                return Some(entry);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            let notified = tokio::time::timeout(self.heartbeat, self.inner.notify.notified()).await;
            if notified.is_err() {
                return Some((
                    Block::empty(self.inner.header.clone()),
                    self.inner.last_watermark.load(Ordering::Acquire),
                ));
            }
        }
    }

    /// Adapt the handle into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = (Block, u32)> {
        let mut stream = self;
        async_stream::stream! {
            while let Some(entry) = stream.recv().await {
                yield entry;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tracing_test::traced_test;
    use weir_common::array::{DataType, ScalarImpl};
    use weir_common::catalog::Field;

    use super::*;

    fn header() -> Schema {
        Schema::new(vec![Field::new("cnt", DataType::UInt64)])
    }

    fn fired_block(count: u64) -> Block {
        Block::from_rows(header(), vec![vec![Some(ScalarImpl::UInt64(count))]])
    }

    #[tokio::test]
    async fn test_recv_and_limit() {
        let registry = WatcherRegistry::new();
        let mut stream = registry.register(header(), Duration::from_secs(60), Some(2), false);

        registry.push_block(&fired_block(3), 5);
        registry.push_block(&fired_block(2), 10);
        registry.push_block(&fired_block(1), 15);

        let (block, watermark) = stream.recv().await.unwrap();
        assert_eq!(watermark, 5);
        assert_eq!(block.cardinality(), 1);
        assert_eq!(stream.recv().await.unwrap().1, 10);
        // Limit of two entries reached.
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_carries_latest_watermark() {
        let registry = WatcherRegistry::new();
        let mut stream = registry.register(header(), Duration::from_millis(20), None, false);

        registry.push_block(&fired_block(1), 5);
        assert_eq!(stream.recv().await.unwrap().1, 5);

        // No fire within the heartbeat interval: an empty block arrives.
        let (block, watermark) = stream.recv().await.unwrap();
        assert_eq!(block.cardinality(), 0);
        assert_eq!(watermark, 5);
    }

    #[tokio::test]
    async fn test_events_only_subscriber_gets_empty_blocks() {
        let registry = WatcherRegistry::new();
        let mut stream = registry.register(header(), Duration::from_secs(60), None, true);

        registry.push_block(&fired_block(7), 5);
        let (block, watermark) = stream.recv().await.unwrap();
        assert_eq!(block.cardinality(), 0);
        assert_eq!(watermark, 5);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let registry = WatcherRegistry::new();
        let mut stream = registry.register(header(), Duration::from_secs(60), None, false);

        for i in 0..(WATCH_QUEUE_CAPACITY as u32 + 3) {
            registry.push_block(&fired_block(1), i + 1);
        }
        // The oldest three entries were dropped, with a warning each.
        assert_eq!(stream.recv().await.unwrap().1, 4);
        assert!(logs_contain("dropping oldest block"));
    }

    #[tokio::test]
    async fn test_into_stream_ends_at_limit() {
        let registry = WatcherRegistry::new();
        let stream = registry
            .register(header(), Duration::from_secs(60), Some(1), false)
            .into_stream();
        futures::pin_mut!(stream);

        registry.push_block(&fired_block(1), 5);
        registry.push_block(&fired_block(1), 10);
        assert_eq!(stream.next().await.unwrap().1, 5);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_registry_prunes_dropped_watchers() {
        let registry = WatcherRegistry::new();
        let stream = registry.register(header(), Duration::from_secs(60), None, false);
        assert!(registry.has_live());
        assert_eq!(registry.live_count(), 1);

        drop(stream);
        assert!(!registry.has_live());
        registry.prune_expired();
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let registry = WatcherRegistry::new();
        let mut stream = registry.register(header(), Duration::from_secs(60), None, false);
        registry.close_all();
        assert!(stream.recv().await.is_none());
    }
}
