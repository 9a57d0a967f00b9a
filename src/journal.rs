//! Append-only log with any number of independent readers.
//!
//! `LocalHub` records every message it routes here. The local demo follows
//! a game live through a reader, and tests replay what was routed.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::task::{AtomicWaker, Context, Poll};
use futures::{Future, FutureExt, Stream};

pub fn journal<T>() -> Journal<T> {
    Journal {
        inner: Arc::new(Shared {
            len: AtomicUsize::new(0),
            state: Mutex::new(State {
                entries: Vec::new(),
                wakers: Vec::new(),
                reader_counter: 0,
            }),
        }),
    }
}

struct State<T> {
    entries: Vec<Arc<T>>,
    wakers: Vec<(usize, Arc<AtomicWaker>)>,
    reader_counter: usize,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    len: AtomicUsize,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // entries are only ever pushed, a poisoned lock still holds a
        // consistent log
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Journal<T> {
    inner: Arc<Shared<T>>,
}

impl<T> Clone for Journal<T> {
    fn clone(&self) -> Self {
        Journal { inner: self.inner.clone() }
    }
}

impl<T> Journal<T> {
    /// A reader positioned at the start of the log.
    pub fn reader(&self) -> JournalReader<T> {
        let mut state = self.inner.lock();

        let reader_id = state.reader_counter;
        state.reader_counter += 1;

        let waker = Arc::new(AtomicWaker::new());
        state.wakers.push((reader_id, waker.clone()));

        JournalReader {
            journal: self.clone(),
            reader_id,
            waker,
            pos: 0,
        }
    }

    pub fn append(&self, entry: T) {
        let mut state = self.inner.lock();
        state.entries.push(Arc::new(entry));
        self.inner.len.store(state.entries.len(), Ordering::Release);
        for (_id, waker) in state.wakers.iter() {
            waker.wake();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct JournalReader<T> {
    journal: Journal<T>,
    waker: Arc<AtomicWaker>,
    reader_id: usize,
    pos: usize,
}

impl<T> JournalReader<T> {
    pub fn recv(&mut self) -> Recv<'_, T> {
        Recv { reader: self }
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<T> Drop for JournalReader<T> {
    fn drop(&mut self) {
        let mut state = self.journal.inner.lock();
        state.wakers.retain(|(id, _)| id != &self.reader_id);
    }
}

impl<T> Stream for JournalReader<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<Self::Item>>
    {
        self.recv().poll_unpin(cx).map(Some)
    }
}

pub struct Recv<'r, T> {
    reader: &'r mut JournalReader<T>,
}

impl<'r, T> Future for Recv<'r, T> {
    type Output = Arc<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Recv { reader } = self.get_mut();

        // register first so an append racing with this poll still wakes us
        reader.waker.register(cx.waker());

        if reader.journal.len() > reader.pos {
            let entry = reader.journal.inner.lock().entries[reader.pos].clone();
            reader.pos += 1;
            Poll::Ready(entry)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn every_reader_sees_every_entry() {
        let log = journal();
        let mut first = log.reader();
        log.append("a");
        log.append("b");
        let mut second = log.reader();

        assert_eq!(*first.recv().await, "a");
        assert_eq!(*first.recv().await, "b");
        assert_eq!(second.next().await.as_deref(), Some(&"a"));
        assert_eq!(second.position(), 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn pending_reader_is_woken_by_append() {
        let log = journal();
        let mut reader = log.reader();
        let writer = log.clone();
        let append = async move {
            tokio::task::yield_now().await;
            writer.append(7u32);
        };
        let (entry, ()) = tokio::join!(reader.recv(), append);
        assert_eq!(*entry, 7);
    }
}
