// Copyright (c) 2024-2025, Hound contributors
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
//    notice, this list of conditions and the following disclaimer in the
//    documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its
//    contributors may be used to endorse or promote products derived
//    from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The reference-counted record (C1) and the bounded, drop-oldest,
//! single-producer/multi-consumer queue (C2).
//!
//! A [`Record`] is fanned out to every queue attached to its producing
//! fd as an `Arc<Record>`: `Arc`'s own strong count *is* the reference
//! count `spec.md` §4.1 describes (release-on-decrement,
//! acquire-on-zero-transition is exactly what `Arc::drop` already does),
//! so there's no hand-rolled atomic counter here.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use hound_api::types::Record;
use hound_api::Error;

/// A fanned-out record. Cloning is a refcount bump; the payload is freed
/// when the last clone is dropped.
pub type RecordRef = Arc<Record>;

struct State {
    items: VecDeque<RecordRef>,
    /// Set by [`Queue::close`] when the owning context stops. Wakes every
    /// blocked reader with an empty result rather than making them wait
    /// forever.
    closed: bool,
}

/// A fixed-capacity FIFO of [`RecordRef`]s.
///
/// One producer (the engine's I/O task) pushes; any number of consumer
/// threads may drain. A single mutex guards the indices and a condition
/// variable wakes blocked readers, matching `spec.md` §4.2's "thread
/// discipline" paragraph.
pub struct Queue {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
}

impl Queue {
    /// Allocates a queue of the given bounded capacity.
    pub fn new(capacity: usize) -> Result<Arc<Queue>, Error> {
        if capacity == 0 {
            return Err(Error::QueueTooSmall);
        }

        Ok(Arc::new(Queue {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }))
    }

    /// Pushes a record. Never blocks: if the queue is at capacity, the
    /// oldest entry is dropped (its `Arc` reference released) to make
    /// room. This is the "sensor firehose" drop-oldest policy of
    /// `spec.md` §4.2 -- stalling the producer to wait on a slow consumer
    /// would back up into the kernel buffer and lose timestamps.
    pub fn push(&self, record: RecordRef) {
        let mut state = self.state.lock().unwrap();

        if state.closed {
            return;
        }

        if state.items.len() >= self.capacity {
            state.items.pop_front();
        }

        state.items.push_back(record);
        drop(state);
        self.not_empty.notify_all();
    }

    /// Blocks until a record is available, or the queue is closed (the
    /// owning context was stopped), in which case `None` is returned.
    pub fn pop_blocking(&self) -> Option<RecordRef> {
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }

            if state.closed {
                return None;
            }

            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Pops one record if available, without blocking.
    pub fn pop_nowait(&self) -> Option<RecordRef> {
        self.state.lock().unwrap().items.pop_front()
    }

    /// Drains up to `n` records under a single lock acquisition.
    pub fn drain_up_to(&self, n: usize) -> Vec<RecordRef> {
        let mut state = self.state.lock().unwrap();
        let n = n.min(state.items.len());

        state.items.drain(..n).collect()
    }

    /// Drains records while the cumulative `payload_size` stays at or
    /// under `budget`. A record whose own payload already exceeds the
    /// remaining budget is left in the queue rather than returned alone
    /// over-budget -- see `DESIGN.md` for why this corner was decided
    /// that way.
    pub fn drain_bytes_up_to(&self, budget: usize) -> (Vec<RecordRef>, usize) {
        let mut state = self.state.lock().unwrap();
        let mut out = Vec::new();
        let mut used = 0usize;

        while let Some(front) = state.items.front() {
            let size = front.payload_size();

            if used + size > budget {
                break;
            }

            used += size;
            out.push(state.items.pop_front().unwrap());
        }

        (out, used)
    }

    /// Drains everything currently queued, without blocking.
    pub fn drain_all(&self) -> Vec<RecordRef> {
        self.state.lock().unwrap().items.drain(..).collect()
    }

    pub fn length(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks the queue closed, drops any residual records, and wakes
    /// every blocked reader. Called by `Context::stop`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();

        state.closed = true;
        state.items.clear();
        drop(state);
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn rec(seqno: u64, size: usize) -> RecordRef {
        Arc::new(Record {
            seqno,
            data_id: 1,
            dev_id: 0,
            timestamp: SystemTime::now(),
            payload: vec![0u8; size].into_boxed_slice(),
        })
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(Queue::new(0).is_err());
    }

    #[test]
    fn drop_oldest_when_full() {
        let q = Queue::new(2).unwrap();

        q.push(rec(0, 1));
        q.push(rec(1, 1));
        q.push(rec(2, 1));

        assert_eq!(q.length(), 2);

        let drained = q.drain_all();
        let seqnos: Vec<_> = drained.iter().map(|r| r.seqno).collect();

        assert_eq!(seqnos, vec![1, 2]);
    }

    #[test]
    fn drain_bytes_up_to_respects_budget() {
        let q = Queue::new(10).unwrap();

        q.push(rec(0, 10));
        q.push(rec(1, 10));
        q.push(rec(2, 10));

        let (drained, used) = q.drain_bytes_up_to(15);

        assert_eq!(drained.len(), 1);
        assert_eq!(used, 10);
        assert_eq!(q.length(), 2);
    }

    #[test]
    fn pop_nowait_empty_sentinel() {
        let q = Queue::new(4).unwrap();

        assert!(q.pop_nowait().is_none());
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let q = Arc::new(Queue::new(4).unwrap());
        let q2 = q.clone();

        let handle = std::thread::spawn(move || q2.pop_blocking());

        std::thread::sleep(std::time::Duration::from_millis(50));
        q.close();

        assert_eq!(handle.join().unwrap(), None);
    }

    /// P2: a record fanned out to K queues is observed by all K pops, and
    /// the payload is freed (the `Arc`'s strong count reaches zero) only
    /// once every queue has dropped its reference.
    #[test]
    fn fanned_out_record_is_observed_by_every_queue_and_freed_once() {
        let q1 = Queue::new(4).unwrap();
        let q2 = Queue::new(4).unwrap();
        let q3 = Queue::new(4).unwrap();

        let record = rec(0, 8);
        assert_eq!(Arc::strong_count(&record), 1);

        q1.push(record.clone());
        q2.push(record.clone());
        q3.push(record.clone());
        drop(record);

        let r1 = q1.pop_nowait().unwrap();
        let r2 = q2.pop_nowait().unwrap();
        let r3 = q3.pop_nowait().unwrap();
        assert_eq!(Arc::strong_count(&r1), 3);

        drop(r1);
        drop(r2);
        assert_eq!(Arc::strong_count(&r3), 1);

        drop(r3);
    }
}
