// SPDX-License-Identifier: Apache-2.0

//! Double-buffered radar ingest pipeline.
//!
//! Three threads cooperate over a pair of ping/pong byte buffers:
//!
//! ```text
//! ┌────────────┐  fill   ┌──────────────┐  drain  ┌────────────┐
//! │   Reader   │ ──────► │  ping/pong   │ ──────► │   Sorter   │
//! │ (UART+sync)│         │   buffers    │         │ (TLV parse)│
//! └─────┬──────┘         └──────────────┘         └─────┬──────┘
//!       │ end-of-frame      ▲ role swap     end-of-drain │
//!       └──────────────► ┌──────────┐ ◄──────────────────┘
//!                        │   Swap   │
//!                        └──────────┘
//! ```
//!
//! The reader appends bytes to the *fill* buffer and detects frame
//! boundaries with a sliding window over the magic word; the sorter parses
//! completed frames from the *drain* buffer; the swap barrier exchanges the
//! two roles once both sides have signaled. The reader can therefore fill
//! frame n+1 while the sorter drains frame n, and never further ahead, so
//! scans leave the pipeline in arrival order.
//!
//! Lock order is barrier state first, then the buffers in index order; the
//! swap thread only touches the buffers while both workers are parked on
//! their resume conditions.

use crate::{
    config::RadarConfig,
    mmwave::{FrameSorter, MAGIC_WORD},
    radar::{Error, RadarScan},
    serial::RadarSource,
};
use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error, info, trace};

/// Both the reader and the sorter have signaled.
const COUNT_SYNC_MAX: u8 = 2;

/// Deferred source constructor, invoked on the reader thread so connection
/// retries do not block startup.
pub type Connector = Box<dyn FnOnce() -> Result<Box<dyn RadarSource>, Error> + Send>;

/// Barrier state protected by the counter lock.
struct SyncState {
    /// Number of workers waiting to swap, in [0, 2].
    count_sync: u8,
    /// Which buffer the reader currently fills; the sorter drains the other.
    fill_idx: usize,
    /// Incremented on every swap; workers wait for it to move.
    epoch: u64,
    /// Mirrors the atomic flag so parked threads observe shutdown.
    shutdown: bool,
}

struct Shared {
    state: Mutex<SyncState>,
    /// Wakes the swap thread when `count_sync` reaches its maximum.
    swap_cv: Condvar,
    /// Resumes the reader after a swap.
    reader_cv: Condvar,
    /// Resumes the sorter after a swap.
    sorter_cv: Condvar,
    /// The ping/pong frame buffers; roles are assigned by `fill_idx`.
    buffers: [Mutex<Vec<u8>>; 2],
    shutdown: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                count_sync: 0,
                fill_idx: 0,
                epoch: 0,
                shutdown: false,
            }),
            swap_cv: Condvar::new(),
            reader_cv: Condvar::new(),
            sorter_cv: Condvar::new(),
            buffers: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            shutdown: AtomicBool::new(false),
        }
    }

    fn request_stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        lock(&self.state).shutdown = true;
        self.swap_cv.notify_all();
        self.reader_cv.notify_all();
        self.sorter_cv.notify_all();
    }
}

/// Recover the guard from a poisoned lock; a panicked sibling thread is
/// already being handled through the shutdown flag.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn wait_while<'a, T, F: FnMut(&mut T) -> bool>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
    condition: F,
) -> MutexGuard<'a, T> {
    cv.wait_while(guard, condition)
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to the running ingest pipeline.
///
/// Spawned by [`RadarPipeline::start`]; scans appear on the channel passed
/// at startup. A fatal reader error (the serial port cannot be opened or
/// dies) shuts the pipeline down and closes the channel.
pub struct RadarPipeline {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl RadarPipeline {
    /// Spawn the reader, sorter and swap threads.
    pub fn start(
        config: RadarConfig,
        connector: Connector,
        scans: kanal::Sender<RadarScan>,
    ) -> Result<Self, Error> {
        let shared = Arc::new(Shared::new());
        let mut handles = Vec::with_capacity(3);

        let spawn = |name: &str, f: Box<dyn FnOnce() + Send>| {
            thread::Builder::new().name(name.to_string()).spawn(f)
        };

        let reader_shared = shared.clone();
        let sorter_shared = shared.clone();
        let swap_shared = shared.clone();

        let threads: [(&str, Box<dyn FnOnce() + Send>); 3] = [
            (
                "radar-read",
                Box::new(move || reader_thread(&reader_shared, connector)),
            ),
            (
                "radar-sort",
                Box::new(move || sorter_thread(&sorter_shared, config, scans)),
            ),
            ("radar-swap", Box::new(move || swap_thread(&swap_shared))),
        ];

        for (name, body) in threads {
            match spawn(name, body) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!("Could not start {} thread: {}", name, err);
                    shared.request_stop();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err.into());
                }
            }
        }

        info!("Radar pipeline started");
        Ok(Self { shared, handles })
    }

    /// Ask all three threads to exit at their next suspension point.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    /// Stop and join all pipeline threads.
    pub fn join(mut self) {
        self.shared.request_stop();
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("radar").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            } else {
                debug!("{} thread joined", name);
            }
        }
    }
}

/// Reader: serial ingress and magic-word framing.
fn reader_thread(shared: &Arc<Shared>, connector: Connector) {
    let mut source = match connector() {
        Ok(source) => source,
        Err(err) => {
            error!("Radar source unavailable: {}", err);
            shared.request_stop();
            return;
        }
    };

    let mut window = [0u8; 8];
    let mut byte = [0u8; 1];

    // Initial resync: consume bytes until the sliding window matches the
    // magic word. The matched bytes never reach the fill buffer.
    while window != MAGIC_WORD {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }
        match source.read(&mut byte) {
            Ok(0) => continue,
            Ok(_) => {
                window.rotate_left(1);
                window[7] = byte[0];
            }
            Err(err) => {
                error!("Serial read failed during resync: {}", err);
                shared.request_stop();
                return;
            }
        }
    }
    trace!("Synchronized on magic word");

    let mut fill_idx = lock(&shared.state).fill_idx;
    let mut fill = lock(&shared.buffers[fill_idx]);
    let mut first_frame = true;

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        match source.read(&mut byte) {
            Ok(0) => continue, // read timeout
            Ok(_) => {}
            Err(err) => {
                drop(fill);
                error!("Serial read failed: {}", err);
                shared.request_stop();
                return;
            }
        }

        fill.push(byte[0]);
        window.rotate_left(1);
        window[7] = byte[0];

        if window == MAGIC_WORD {
            // The frame is complete up to the trailing magic word, which is
            // left in place for the sorter's length check.
            let mut state = lock(&shared.state);
            drop(fill);

            state.count_sync += 1;
            if first_frame {
                // The sorter has not drained anything yet and will not
                // signal for this first frame.
                state.count_sync += 1;
                first_frame = false;
            }
            if state.count_sync == COUNT_SYNC_MAX {
                shared.swap_cv.notify_one();
            }

            let epoch = state.epoch;
            let state = wait_while(&shared.reader_cv, state, |s| {
                !s.shutdown && s.epoch == epoch
            });
            if state.shutdown {
                return;
            }
            fill_idx = state.fill_idx;
            drop(state);

            fill = lock(&shared.buffers[fill_idx]);
            fill.clear();
            window = [0u8; 8];
        }
    }
}

/// Sorter: TLV parsing of drained frames.
fn sorter_thread(shared: &Arc<Shared>, config: RadarConfig, scans: kanal::Sender<RadarScan>) {
    let mut sorter = FrameSorter::new(config);

    // Park until the first frame has been framed and swapped in.
    let mut drain_idx = {
        let state = lock(&shared.state);
        let state = wait_while(&shared.sorter_cv, state, |s| !s.shutdown && s.epoch == 0);
        if state.shutdown {
            return;
        }
        1 - state.fill_idx
    };
    let mut drain = lock(&shared.buffers[drain_idx]);

    loop {
        if shared.shutdown.load(Ordering::Relaxed) {
            return;
        }

        for scan in sorter.sort_frame(&drain) {
            match scans.try_send(scan) {
                Ok(true) => {}
                Ok(false) => debug!("Scan queue full, dropping frame"),
                Err(_) => {
                    // Publisher is gone; nothing left to feed.
                    drop(drain);
                    shared.request_stop();
                    return;
                }
            }
        }

        let mut state = lock(&shared.state);
        drop(drain);

        state.count_sync += 1;
        if state.count_sync == COUNT_SYNC_MAX {
            shared.swap_cv.notify_one();
        }

        let epoch = state.epoch;
        let state = wait_while(&shared.sorter_cv, state, |s| {
            !s.shutdown && s.epoch == epoch
        });
        if state.shutdown {
            return;
        }
        drain_idx = 1 - state.fill_idx;
        drop(state);

        drain = lock(&shared.buffers[drain_idx]);
    }
}

/// Swap: the two-party barrier that exchanges the buffer roles.
fn swap_thread(shared: &Arc<Shared>) {
    loop {
        let state = lock(&shared.state);
        let mut state = wait_while(&shared.swap_cv, state, |s| {
            !s.shutdown && s.count_sync < COUNT_SYNC_MAX
        });
        if state.shutdown {
            return;
        }

        {
            // Both workers are parked, so the buffer locks are free; taking
            // them in index order upholds the global lock order.
            let _fill = lock(&shared.buffers[0]);
            let _drain = lock(&shared.buffers[1]);
            state.fill_idx = 1 - state.fill_idx;
        }

        state.count_sync = 0;
        state.epoch += 1;
        shared.reader_cv.notify_all();
        shared.sorter_cv.notify_all();
    }
}
