//! Per-pipe observability counters.
//!
//! A [`Metric`] is shared between the supervisor (message counter) and the
//! stage runners (per-component meters). Everything is advanced with
//! relaxed atomics on the hot path; snapshots are taken out-of-band.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use brook_core::{ComponentId, SampleBuffer};

#[derive(Debug, Default)]
struct MeterState {
    buffers: AtomicU64,
    samples: AtomicU64,
    latency_ns: AtomicU64,
}

/// Shared counters for one pipe.
#[derive(Debug, Clone, Default)]
pub struct Metric {
    inner: Arc<MetricInner>,
}

#[derive(Debug, Default)]
struct MetricInner {
    messages: AtomicU64,
    meters: Mutex<HashMap<ComponentId, Arc<MeterState>>>,
}

impl Metric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages prepared by the supervisor so far.
    pub fn messages(&self) -> u64 {
        self.inner.messages.load(Ordering::Relaxed)
    }

    pub(crate) fn stamp_message(&self) {
        self.inner.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// The recorder handed to the runner of `id`. Meters persist across
    /// runs, so repeated calls return views onto the same counters.
    pub(crate) fn meter(&self, id: ComponentId) -> Meter {
        let state = Arc::clone(
            self.inner
                .meters
                .lock()
                .expect("metric registry mutex poisoned")
                .entry(id)
                .or_default(),
        );
        Meter { state, last: None }
    }

    pub fn snapshot(&self, id: ComponentId) -> Option<MeterSnapshot> {
        let meters = self.inner.meters.lock().expect("metric registry mutex poisoned");
        meters.get(&id).map(|state| MeterSnapshot {
            buffers: state.buffers.load(Ordering::Relaxed),
            samples: state.samples.load(Ordering::Relaxed),
            latency: Duration::from_nanos(state.latency_ns.load(Ordering::Relaxed)),
        })
    }
}

/// Point-in-time view of one component's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterSnapshot {
    /// Buffers that passed the component.
    pub buffers: u64,
    /// Total samples across those buffers.
    pub samples: u64,
    /// Cumulative time between consecutive buffers.
    pub latency: Duration,
}

/// Per-component recorder owned by a stage runner.
pub(crate) struct Meter {
    state: Arc<MeterState>,
    last: Option<Instant>,
}

impl Meter {
    /// Starts the latency window at loop entry.
    pub(crate) fn mark(&mut self) {
        self.last = Some(Instant::now());
    }

    pub(crate) fn record(&mut self, buffer: &SampleBuffer) {
        self.state.buffers.fetch_add(1, Ordering::Relaxed);
        self.state.samples.fetch_add(buffer.samples() as u64, Ordering::Relaxed);
        let now = Instant::now();
        if let Some(last) = self.last.replace(now) {
            self.state
                .latency_ns
                .fetch_add(now.duration_since(last).as_nanos() as u64, Ordering::Relaxed);
        }
    }
}
