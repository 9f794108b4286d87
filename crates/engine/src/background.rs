//! Background maintenance worker
//!
//! One thread per engine drives the interval work: batched WAL fsync,
//! cold-tier flushing of dirty entries, and periodic snapshots. The loop
//! wakes on the fsync interval (the shortest cadence) and checks whether
//! the snapshot interval has also elapsed.
//!
//! The worker holds only a `Weak` reference to the engine; if the engine
//! is dropped without `disconnect`, the next wake-up notices and exits.

use crate::kv::KvEngine;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Shared {
    stop: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the engine's maintenance thread.
pub(crate) struct BackgroundWorker {
    handle: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl BackgroundWorker {
    /// Spawn the worker for an engine.
    pub(crate) fn spawn(
        engine: Weak<KvEngine>,
        fsync_interval_ms: u64,
        snapshot_interval_ms: u64,
    ) -> Self {
        let shared = Arc::new(Shared {
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let tick = Duration::from_millis(fsync_interval_ms.max(1));
        let snapshot_every = Duration::from_millis(snapshot_interval_ms.max(1));

        let handle = std::thread::Builder::new()
            .name("bri-bg".to_string())
            .spawn(move || {
                let mut last_snapshot = Instant::now();
                loop {
                    {
                        let mut stop = loop_shared.stop.lock();
                        if *stop {
                            return;
                        }
                        loop_shared.wake.wait_for(&mut stop, tick);
                        if *stop {
                            return;
                        }
                    }

                    let Some(engine) = engine.upgrade() else {
                        return;
                    };
                    let snapshot_due = last_snapshot.elapsed() >= snapshot_every;
                    if snapshot_due {
                        last_snapshot = Instant::now();
                    }
                    engine.background_tick(snapshot_due);
                }
            })
            .expect("failed to spawn background worker thread");

        BackgroundWorker {
            handle: Some(handle),
            shared,
        }
    }

    /// Signal the worker to exit and join it.
    pub(crate) fn stop(&mut self) {
        {
            let mut stop = self.shared.stop.lock();
            *stop = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
