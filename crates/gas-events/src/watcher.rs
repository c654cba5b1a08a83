//! Poll-based event watcher (spec.md §4.2, "Watcher").

use std::sync::Arc;
use std::time::Duration;

use gas_core::{Error, Result};

use crate::store::Recorder;
use crate::types::{Event, EventFilter};

/// Default poll interval for `Watcher::next`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Watches a recorder for events past a cursor, polling at a fixed interval.
/// There is no separate close signal: cancel the future driving `next` (or
/// drop a `tokio_util::sync::CancellationToken` equivalent) to stop.
pub struct Watcher<R: Recorder> {
    recorder: Arc<R>,
    cursor: u64,
    interval: Duration,
}

impl<R: Recorder> Watcher<R> {
    /// Create a watcher starting after `after_seq`, using the default poll
    /// interval.
    pub fn new(recorder: Arc<R>, after_seq: u64) -> Self {
        Self {
            recorder,
            cursor: after_seq,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The seq this watcher has observed up to.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Block until an event with `seq > cursor` appears, then return it and
    /// advance the cursor. Events are returned in seq order: if more than
    /// one new event exists, the lowest-seq one is returned first and the
    /// rest are picked up on the next call.
    ///
    /// A cancelled `cancel` future returns `Error::Timeout` immediately
    /// rather than waiting out the full poll interval, honoring spec.md
    /// §5's "Watchers honor cancellation promptly (at most one poll
    /// interval)".
    pub async fn next(&mut self, cancel: impl std::future::Future<Output = ()>) -> Result<Event> {
        tokio::pin!(cancel);
        loop {
            let pending = self
                .recorder
                .list(&EventFilter::new().with_after_seq(self.cursor))
                .await?;
            if let Some(event) = pending.into_iter().min_by_key(|e| e.seq) {
                self.cursor = event.seq;
                return Ok(event);
            }
            tokio::select! {
                () = &mut cancel => {
                    return Err(Error::timeout("watch.cancelled", Duration::from_secs(0)));
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryRecorder;
    use std::sync::Arc;

    #[tokio::test]
    async fn next_returns_immediately_when_event_already_past_cursor() {
        let recorder = Arc::new(MemoryRecorder::new());
        recorder
            .try_record(Event::new("bead.created", "alice", "gc-1", "created"))
            .await
            .unwrap();
        let mut watcher = Watcher::new(recorder, 0).with_interval(Duration::from_millis(5));
        let event = watcher
            .next(std::future::pending())
            .await
            .unwrap();
        assert_eq!(event.seq, 1);
        assert_eq!(watcher.cursor(), 1);
    }

    #[tokio::test]
    async fn next_waits_for_new_event() {
        let recorder = Arc::new(MemoryRecorder::new());
        let mut watcher = Watcher::new(Arc::clone(&recorder), 0).with_interval(Duration::from_millis(5));

        let recorder2 = Arc::clone(&recorder);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            recorder2
                .try_record(Event::new("bead.created", "alice", "gc-1", "created"))
                .await
                .unwrap();
        });

        let event = watcher.next(std::future::pending()).await.unwrap();
        assert_eq!(event.seq, 1);
    }

    #[tokio::test]
    async fn next_returns_events_in_seq_order_across_calls() {
        let recorder = Arc::new(MemoryRecorder::new());
        recorder
            .try_record(Event::new("a", "alice", "gc-1", "m"))
            .await
            .unwrap();
        recorder
            .try_record(Event::new("b", "alice", "gc-2", "m"))
            .await
            .unwrap();
        let mut watcher = Watcher::new(recorder, 0).with_interval(Duration::from_millis(5));
        let first = watcher.next(std::future::pending()).await.unwrap();
        let second = watcher.next(std::future::pending()).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn next_honors_cancellation() {
        let recorder = Arc::new(MemoryRecorder::new());
        let mut watcher = Watcher::new(recorder, 0).with_interval(Duration::from_secs(5));
        let result = watcher
            .next(async { tokio::time::sleep(Duration::from_millis(5)).await })
            .await;
        assert!(result.is_err());
    }
}
