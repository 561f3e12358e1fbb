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

//! Hound ingests heterogeneous sensor/telemetry streams through a small
//! set of pluggable drivers and fans each stream out to any number of
//! independent, bounded per-consumer queues.
//!
//! A process constructs one [`Hound`], registers the driver factories it
//! needs, brings up driver instances with [`Hound::init_driver`], and then
//! allocates a [`Context`] per consumer to subscribe to a set of data ids
//! at a chosen period. Everything downstream of a driver producing a
//! [`Record`](hound_api::types::Record) happens through one background
//! engine task; the public handles here are cheap, cloneable, `Send`
//! wrappers around a channel to it.
//!
//! Bundled reference drivers live in [`drivers`]; real deployments
//! register their own [`DriverFactory`](hound_api::driver::DriverFactory)
//! implementations instead.

mod context;
mod engine;
mod queue;

pub mod drivers;

pub use context::Context;
pub use library::{DataDescriptor, Hound};
pub use queue::RecordRef;

mod library;

pub use hound_api::driver::{
    DriverConfig, DriverCtx, DriverFactory, DriverMode, DriverOps, IoStyle, PollEvents,
    PollOutcome,
};
pub use hound_api::types::{
    DataFormat, DataId, DataRequest, DeviceId, DriverDescriptor, Period, Record, RequestList,
    SchemaDescriptor, SeqNo, Type, Unit,
};
pub use hound_api::Error;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use drivers::{counter, file, nop};

    /// Scenario 1: a NOP driver never produces, and no errors occur across
    /// the alloc/start/read/stop/free lifecycle.
    #[tokio::test]
    async fn nop_driver_produces_nothing() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(nop::NopFactory))
            .await
            .unwrap();
        hound
            .init_driver("nop", "/dev/nop", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx_single(nop::DATA_ID, 1_000_000_000, 10)
            .await
            .unwrap();

        ctx.start();
        assert_eq!(ctx.read_nowait(10).len(), 0);

        ctx.stop().await.unwrap();
        ctx.free().unwrap();
    }

    /// Scenario 2: the file driver only produces in response to `next`,
    /// and after enough iterations every chunk of the file has been seen.
    #[tokio::test]
    async fn file_driver_on_demand_pull() {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("hound-file-driver-test-{:?}", std::thread::current().id()));

        let contents = vec![b'x'; 4096];
        {
            let mut f = std::fs::File::create(&tmp).unwrap();
            f.write_all(&contents).unwrap();
        }

        let hound = Hound::new();

        hound
            .register_driver(Arc::new(file::FileFactory))
            .await
            .unwrap();
        hound
            .init_driver(
                "file",
                "/dev/file",
                vec![tmp.to_string_lossy().into_owned()],
                DriverConfig::default(),
            )
            .await
            .unwrap();

        let ctx = hound.alloc_ctx_single(file::DATA_ID, 0, 100).await.unwrap();
        ctx.start();

        let mut consumed = 0usize;
        let iterations = contents.len().div_ceil(file::CHUNK_LEN);

        for _ in 0..iterations {
            ctx.next(1).await.unwrap();
            let records = ctx.read(1).await.unwrap();

            for record in &records {
                consumed += record.payload_size();
            }
        }

        assert_eq!(consumed, contents.len());

        ctx.stop().await.unwrap();
        ctx.free().unwrap();
        let _ = std::fs::remove_file(&tmp);
    }

    /// Scenario 3: a 1 kHz counter produces contiguous seqnos.
    #[tokio::test]
    async fn counter_driver_periodic_production() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(counter::CounterFactory))
            .await
            .unwrap();
        hound
            .init_driver("counter", "/dev/counter", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx_single(counter::DATA_ID, counter::PERIOD_NS, 10_000)
            .await
            .unwrap();

        ctx.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let records = ctx.read_all_nowait();
        assert!(records.len() >= 90, "expected >= 90 records, got {}", records.len());

        for pair in records.windows(2) {
            assert_eq!(pair[1].seqno, pair[0].seqno + 1);
        }

        ctx.stop().await.unwrap();
        ctx.free().unwrap();
    }

    /// Scenario 4: a slow consumer never sees the queue exceed capacity,
    /// and whatever it does see is contiguous (even if it starts well
    /// above zero because of drop-oldest).
    #[tokio::test]
    async fn slow_consumer_drops_oldest_without_leaking() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(counter::CounterFactory))
            .await
            .unwrap();
        hound
            .init_driver("counter", "/dev/counter", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx_single(counter::DATA_ID, counter::PERIOD_NS, 8)
            .await
            .unwrap();

        ctx.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(ctx.queue_length() <= 8);

        let records = ctx.read_all_nowait();

        for pair in records.windows(2) {
            assert_eq!(pair[1].seqno, pair[0].seqno + 1);
        }

        ctx.stop().await.unwrap();
        ctx.free().unwrap();
    }

    /// Scenario 5: two drivers cannot claim the same data id; once the
    /// first is destroyed, the second can take its place.
    #[tokio::test]
    async fn conflicting_drivers_then_destroy_then_retry() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(nop::NopFactory))
            .await
            .unwrap();

        hound
            .init_driver("nop", "/dev/nop-a", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let err = hound
            .init_driver("nop", "/dev/nop-b", Vec::new(), DriverConfig::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConflictingDrivers { .. }));

        hound.destroy_driver("/dev/nop-a").await.unwrap();

        hound
            .init_driver("nop", "/dev/nop-b", Vec::new(), DriverConfig::default())
            .await
            .unwrap();
    }

    /// Scenario 6: two contexts subscribed to the same data id both keep
    /// receiving records until each stops; after the last one stops, the
    /// driver's fd is removed from the loop (observable here as the
    /// driver becoming destroyable without `DriverInUse`).
    #[tokio::test]
    async fn subscription_refcounting_across_two_contexts() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(counter::CounterFactory))
            .await
            .unwrap();
        hound
            .init_driver("counter", "/dev/counter", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx_a = hound
            .alloc_ctx_single(counter::DATA_ID, counter::PERIOD_NS, 100)
            .await
            .unwrap();
        let ctx_b = hound
            .alloc_ctx_single(counter::DATA_ID, counter::PERIOD_NS, 100)
            .await
            .unwrap();

        ctx_a.start();
        ctx_b.start();

        tokio::time::sleep(Duration::from_millis(50)).await;

        ctx_a.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            ctx_b.queue_length() > 0 || !ctx_b.read_all_nowait().is_empty(),
            "second context should keep receiving after the first stops"
        );

        ctx_b.stop().await.unwrap();

        ctx_a.free().unwrap();
        ctx_b.free().unwrap();

        // Driver's aggregate request set is now empty, fd removed from
        // the loop, and it should be destroyable.
        hound.destroy_driver("/dev/counter").await.unwrap();
    }

    /// P7: `free` before `stop` fails with `CtxActive`; after `stop` it
    /// succeeds.
    #[tokio::test]
    async fn free_before_stop_is_rejected() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(nop::NopFactory))
            .await
            .unwrap();
        hound
            .init_driver("nop", "/dev/nop", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx_single(nop::DATA_ID, 0, 10)
            .await
            .unwrap();

        ctx.start();

        let err = ctx.free().unwrap_err();
        assert!(matches!(err, Error::CtxActive));
    }

    /// P10: `get_device_name` returns exactly what the driver's
    /// `device_name` hook wrote.
    #[tokio::test]
    async fn device_name_matches_driver_hook() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(nop::NopFactory))
            .await
            .unwrap();

        hound
            .init_driver("nop", "/dev/nop", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let descs = hound.get_datadesc().await.unwrap();
        let dev_id = descs[0].dev_id;

        assert_eq!(hound.get_device_name(dev_id).await.unwrap(), "nop");
    }

    /// P9: `read(n)` returns after exactly `n` records; `read_nowait(n)`
    /// never returns more than `n` even when more are queued.
    #[tokio::test]
    async fn read_returns_exactly_n_and_read_nowait_caps_at_n() {
        let hound = Hound::new();

        hound
            .register_driver(Arc::new(counter::CounterFactory))
            .await
            .unwrap();
        hound
            .init_driver("counter", "/dev/counter", Vec::new(), DriverConfig::default())
            .await
            .unwrap();

        let ctx = hound
            .alloc_ctx_single(counter::DATA_ID, counter::PERIOD_NS, 10_000)
            .await
            .unwrap();

        ctx.start();

        let records = ctx.read(5).await.unwrap();
        assert_eq!(records.len(), 5);

        tokio::time::sleep(Duration::from_millis(50)).await;

        let nowait = ctx.read_nowait(3);
        assert!(nowait.len() <= 3);

        ctx.stop().await.unwrap();
        ctx.free().unwrap();
    }
}

