use std::cmp::{Ord, Ordering};
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;

use futures::ready;
use futures::stream::{FusedStream, Stream};
use futures::task::{Context, Poll};
use tokio::time::{sleep_until, Instant, Sleep};

struct Timeout<T> {
    instant: Instant,
    item: T,
}

impl<T> PartialEq for Timeout<T> {
    fn eq(&self, other: &Timeout<T>) -> bool {
        self.instant == other.instant
    }
}

impl<T> Eq for Timeout<T> {}

impl<T> PartialOrd for Timeout<T> {
    fn partial_cmp(&self, other: &Timeout<T>) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Timeout<T> {
    fn cmp(&self, other: &Timeout<T>) -> Ordering {
        // Reverse these, so that the timeout that will happen
        // next is the maximum.
        // We can then use collections::BinaryHeap as a min-heap.
        self.instant.cmp(&other.instant).reverse()
    }
}

/// Items waiting for a deadline. The stream yields each item once its
/// deadline has passed, earliest first, and never terminates.
pub struct TimeoutHeap<T> {
    sleep: Pin<Box<Sleep>>,
    heap: BinaryHeap<Timeout<T>>,
}

impl<T> TimeoutHeap<T> {
    pub fn new() -> Self {
        TimeoutHeap {
            sleep: Box::pin(sleep_until(Instant::now())),
            heap: BinaryHeap::new(),
        }
    }

    pub fn enqueue(&mut self, item: T, instant: Instant) {
        self.heap.push(Timeout { item, instant });
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for TimeoutHeap<T> {
    fn default() -> Self {
        TimeoutHeap::new()
    }
}

impl<T: Unpin> Stream for TimeoutHeap<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>>
    {
        let s = self.get_mut();

        // Nothing to wait for. Callers poll again after enqueueing.
        let deadline = match s.heap.peek() {
            Some(timeout) => timeout.instant,
            None => return Poll::Pending,
        };

        if s.sleep.deadline() != deadline {
            s.sleep.as_mut().reset(deadline);
        }

        ready!(s.sleep.as_mut().poll(cx));
        Poll::Ready(s.heap.pop().map(|timeout| timeout.item))
    }
}

impl<T: Unpin> FusedStream for TimeoutHeap<T> {
    fn is_terminated(&self) -> bool {
        false
    }
}
