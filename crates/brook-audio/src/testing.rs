//! Stub components and probes shared by the engine test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use brook_core::{
    Capabilities, Component, ComponentId, PipeId, Processor, Pump, SampleBuffer, Sink, StageError,
    StreamSpec,
};

/// Marker error for fault-injection assertions.
#[derive(Debug, thiserror::Error)]
#[error("injected test failure")]
pub(crate) struct TestBoom;

/// Lifecycle counters shared between a stub and its test.
#[derive(Clone, Default)]
pub(crate) struct StageStats {
    inner: Arc<StageStatsInner>,
}

#[derive(Default)]
struct StageStatsInner {
    binds: AtomicUsize,
    resets: AtomicUsize,
    flushes: AtomicUsize,
    interrupts: AtomicUsize,
    calls: AtomicUsize,
}

impl StageStats {
    pub(crate) fn binds(&self) -> usize {
        self.inner.binds.load(Ordering::SeqCst)
    }

    pub(crate) fn resets(&self) -> usize {
        self.inner.resets.load(Ordering::SeqCst)
    }

    pub(crate) fn flushes(&self) -> usize {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    pub(crate) fn interrupts(&self) -> usize {
        self.inner.interrupts.load(Ordering::SeqCst)
    }

    fn note(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared append-only log for sequencing assertions.
#[derive(Clone, Default)]
pub(crate) struct OrderLog {
    entries: Arc<Mutex<Vec<&'static str>>>,
}

impl OrderLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, entry: &'static str) {
        self.entries.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<&'static str> {
        self.entries.lock().unwrap().clone()
    }
}

/// Polls `condition` until it holds or the deadline passes.
pub(crate) fn eventually(deadline: Duration, condition: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Mono pump emitting `total` buffers whose samples all carry the 1-based
/// buffer index, then end-of-stream. `usize::MAX` keeps it running forever.
pub(crate) struct CountingPump {
    id: ComponentId,
    total: usize,
    frames: usize,
    produced: usize,
    fail_after: Option<usize>,
    stats: StageStats,
    bind_log: Option<(OrderLog, &'static str)>,
    bind_fails: bool,
}

impl CountingPump {
    pub(crate) fn new(total: usize, frames: usize) -> Self {
        Self {
            id: ComponentId::next(),
            total,
            frames,
            produced: 0,
            fail_after: None,
            stats: StageStats::default(),
            bind_log: None,
            bind_fails: false,
        }
    }

    pub(crate) fn endless(frames: usize) -> Self {
        Self::new(usize::MAX, frames)
    }

    /// Fails with [`TestBoom`] once `successes` buffers have been produced.
    pub(crate) fn failing_after(successes: usize, frames: usize) -> Self {
        let mut pump = Self::new(usize::MAX, frames);
        pump.fail_after = Some(successes);
        pump
    }

    pub(crate) fn with_bind_log(mut self, log: OrderLog, name: &'static str) -> Self {
        self.bind_log = Some((log, name));
        self
    }

    pub(crate) fn stats(&self) -> StageStats {
        self.stats.clone()
    }
}

impl Component for CountingPump {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_reset().with_flush().with_interrupt()
    }

    fn reset(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.resets);
        Ok(())
    }

    fn flush(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.flushes);
        Ok(())
    }

    fn interrupt(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.interrupts);
        Ok(())
    }
}

impl Pump for CountingPump {
    fn bind(&mut self, _pipe: PipeId) -> Result<StreamSpec, StageError> {
        self.stats.note(&self.stats.inner.binds);
        if let Some((log, name)) = &self.bind_log {
            log.push(name);
        }
        if self.bind_fails {
            return Err(StageError::Fatal(anyhow::Error::new(TestBoom)));
        }
        StreamSpec {
            sample_rate: 44_100,
            channels: 1,
        }
        .validate()
    }

    fn produce(&mut self, buffer_size: usize) -> Result<SampleBuffer, StageError> {
        self.stats.note(&self.stats.inner.calls);
        if self.fail_after == Some(self.produced) {
            return Err(StageError::Fatal(anyhow::Error::new(TestBoom)));
        }
        if self.produced >= self.total {
            return Err(StageError::EndOfStream);
        }
        self.produced += 1;
        let frames = self.frames.min(buffer_size.max(1));
        Ok(SampleBuffer::from_planes(vec![vec![
            self.produced as f32;
            frames
        ]]))
    }
}

/// Processor multiplying every sample by a constant.
pub(crate) struct ScalingProcessor {
    id: ComponentId,
    scale: f32,
    log: Option<OrderLog>,
    stats: StageStats,
    bind_log: Option<(OrderLog, &'static str)>,
    bind_fails: bool,
}

impl ScalingProcessor {
    pub(crate) fn new(scale: f32) -> Self {
        Self {
            id: ComponentId::next(),
            scale,
            log: None,
            stats: StageStats::default(),
            bind_log: None,
            bind_fails: false,
        }
    }

    pub(crate) fn with_log(scale: f32, log: OrderLog) -> Self {
        let mut processor = Self::new(scale);
        processor.log = Some(log);
        processor
    }

    pub(crate) fn with_bind_log(mut self, log: OrderLog, name: &'static str) -> Self {
        self.bind_log = Some((log, name));
        self
    }

    pub(crate) fn failing_bind(mut self) -> Self {
        self.bind_fails = true;
        self
    }

    pub(crate) fn stats(&self) -> StageStats {
        self.stats.clone()
    }
}

impl Component for ScalingProcessor {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_reset().with_flush().with_interrupt()
    }

    fn reset(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.resets);
        Ok(())
    }

    fn flush(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.flushes);
        Ok(())
    }

    fn interrupt(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.interrupts);
        Ok(())
    }
}

impl Processor for ScalingProcessor {
    fn bind(&mut self, _pipe: PipeId, _spec: StreamSpec) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.binds);
        if let Some((log, name)) = &self.bind_log {
            log.push(name);
        }
        if self.bind_fails {
            return Err(StageError::Fatal(anyhow::Error::new(TestBoom)));
        }
        Ok(())
    }

    fn process(&mut self, mut input: SampleBuffer) -> Result<SampleBuffer, StageError> {
        self.stats.note(&self.stats.inner.calls);
        if let Some(log) = &self.log {
            log.push("process");
        }
        for channel in 0..input.channels() {
            if let Some(plane) = input.plane_mut(channel) {
                for sample in plane {
                    *sample *= self.scale;
                }
            }
        }
        Ok(input)
    }
}

/// Sink appending every channel-0 sample to a shared vector.
pub(crate) struct CapturingSink {
    id: ComponentId,
    captured: Arc<Mutex<Vec<f32>>>,
    received: usize,
    fail_at: Option<usize>,
    stats: StageStats,
    bind_log: Option<(OrderLog, &'static str)>,
    bind_fails: bool,
}

impl CapturingSink {
    pub(crate) fn new() -> Self {
        Self {
            id: ComponentId::next(),
            captured: Arc::new(Mutex::new(Vec::new())),
            received: 0,
            fail_at: None,
            stats: StageStats::default(),
            bind_log: None,
            bind_fails: false,
        }
    }

    /// Fails with [`TestBoom`] on the `call`-th receive (1-based).
    pub(crate) fn failing_after(call: usize) -> Self {
        let mut sink = Self::new();
        sink.fail_at = Some(call);
        sink
    }

    pub(crate) fn with_bind_log(mut self, log: OrderLog, name: &'static str) -> Self {
        self.bind_log = Some((log, name));
        self
    }

    pub(crate) fn samples(&self) -> Arc<Mutex<Vec<f32>>> {
        Arc::clone(&self.captured)
    }

    pub(crate) fn stats(&self) -> StageStats {
        self.stats.clone()
    }
}

impl Component for CapturingSink {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_reset().with_flush().with_interrupt()
    }

    fn reset(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.resets);
        Ok(())
    }

    fn flush(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.flushes);
        Ok(())
    }

    fn interrupt(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.interrupts);
        Ok(())
    }
}

impl Sink for CapturingSink {
    fn bind(&mut self, _pipe: PipeId, _spec: StreamSpec) -> Result<(), StageError> {
        self.stats.note(&self.stats.inner.binds);
        if let Some((log, name)) = &self.bind_log {
            log.push(name);
        }
        if self.bind_fails {
            return Err(StageError::Fatal(anyhow::Error::new(TestBoom)));
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &SampleBuffer) -> Result<(), StageError> {
        self.received += 1;
        if self.fail_at == Some(self.received) {
            return Err(StageError::Fatal(anyhow::Error::new(TestBoom)));
        }
        self.stats.note(&self.stats.inner.calls);
        if let Some(plane) = buffer.plane(0) {
            self.captured.lock().unwrap().extend_from_slice(plane);
        }
        Ok(())
    }
}
