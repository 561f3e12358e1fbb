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

//! The user-facing subscription handle (C7): binds a [`RequestList`] to a
//! queue, drives `start`/`stop`, and drains records -- triggering
//! pull-mode drivers along the way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hound_api::types::RequestList;
use hound_api::Error;

use crate::engine::{BoundDriver, EngineHandle};
use crate::queue::{Queue, RecordRef};

/// A subscription binding a request list to one bounded queue.
///
/// Mirrors `spec.md` §4.7/§3's `Context`: allocated with [`Context::alloc`],
/// started, read from, stopped, and finally freed. Dropping a `Context`
/// without calling [`Context::stop`] first leaks the subscription on the
/// engine side (the driver keeps producing into a queue nobody drains) --
/// callers are expected to stop explicitly, matching the "free must be
/// preceded by stop" rule.
pub struct Context {
    engine: EngineHandle,
    queue: Arc<Queue>,
    bound: Vec<BoundDriver>,
    active: AtomicBool,
}

impl Context {
    /// Implements `spec.md` §4.7's `alloc`: validates via
    /// [`RequestList::new`] (duplicate/too-much-data checks happen there),
    /// resolves and partitions the request list per driver, and issues a
    /// `ref` per partition, rolling back on failure.
    pub async fn alloc(
        engine: &EngineHandle,
        requests: RequestList,
        queue_capacity: usize,
    ) -> Result<Context, Error> {
        if queue_capacity == 0 {
            return Err(Error::QueueTooSmall);
        }

        let (queue, bound) = engine.alloc_subscription(requests, queue_capacity).await?;

        Ok(Context {
            engine: engine.clone(),
            queue,
            bound,
            active: AtomicBool::new(false),
        })
    }

    /// No-op at the engine level: the driver partitions this context is
    /// bound to may already be producing for other contexts. Only this
    /// context's own bookkeeping (whether reads are permitted) changes.
    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Unref's every driver partition, closes the queue (waking any
    /// blocked reader with `None`), and marks the context inactive so a
    /// later `free` succeeds.
    pub async fn stop(&self) -> Result<(), Error> {
        self.active.store(false, Ordering::SeqCst);

        self.engine
            .free_subscription(self.queue.clone(), self.bound.clone())
            .await
    }

    /// Must be preceded by [`Context::stop`]; otherwise fails with
    /// [`Error::CtxActive`] per `spec.md` §4.7.
    pub fn free(self) -> Result<(), Error> {
        if self.active.load(Ordering::SeqCst) {
            return Err(Error::CtxActive);
        }

        Ok(())
    }

    /// On-demand pull trigger (`spec.md` §6's `next(handle, n)`). A no-op
    /// on partitions currently in push mode.
    pub async fn next(&self, n: u32) -> Result<(), Error> {
        self.engine.next(self.bound.clone(), n).await
    }

    /// Drains exactly `n` records, blocking while the queue is empty.
    /// Before draining, triggers one `next(data_id, 1)` per pull-mode
    /// partition so on-demand drivers have a chance to produce.
    pub async fn read(&self, n: usize) -> Result<Vec<RecordRef>, Error> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(Error::CtxNotActive);
        }

        self.engine.next(self.bound.clone(), n as u32).await.ok();

        let queue = self.queue.clone();
        let out = tokio::task::spawn_blocking(move || {
            let mut out = Vec::with_capacity(n);

            for _ in 0..n {
                match queue.pop_blocking() {
                    Some(record) => out.push(record),
                    None => break,
                }
            }

            out
        })
        .await
        .map_err(|e| Error::DriverFail(e.to_string()))?;

        Ok(out)
    }

    /// Drains up to `n` records without blocking. Does not trigger
    /// pull-mode partitions.
    pub fn read_nowait(&self, n: usize) -> Vec<RecordRef> {
        self.queue.drain_up_to(n)
    }

    /// Drains records while their cumulative payload size stays at or
    /// under `budget`. Returns the records and the bytes they occupy.
    pub fn read_bytes_nowait(&self, budget: usize) -> (Vec<RecordRef>, usize) {
        self.queue.drain_bytes_up_to(budget)
    }

    /// Drains everything currently queued, without blocking.
    pub fn read_all_nowait(&self) -> Vec<RecordRef> {
        self.queue.drain_all()
    }

    pub fn queue_length(&self) -> usize {
        self.queue.length()
    }

    pub fn max_queue_length(&self) -> usize {
        self.queue.capacity()
    }
}
