//! Timeline-backed virtual pump.
//!
//! A [`Track`] materialises a sparse arrangement of clips over immutable
//! [`Asset`]s into a dense stream of fixed-size buffers. Placements are
//! kept sorted and disjoint: inserting a clip over occupied frames splits
//! the older placement into the remainders bracketing the newcomer, so the
//! most recent insertion wins every overlapped frame. Uncovered frames
//! render as silence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use brook_core::{
    Capabilities, Component, ComponentId, Param, PipeId, Pump, SampleBuffer, StageError,
    StreamSpec,
};

/// Immutable, cheaply shareable sample matrix clips are cut from.
#[derive(Debug, Clone)]
pub struct Asset {
    buffer: Arc<SampleBuffer>,
}

impl Asset {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer: Arc::new(buffer),
        }
    }

    pub fn from_planes(planes: Vec<Vec<f32>>) -> Self {
        Self::new(SampleBuffer::from_planes(planes))
    }

    pub fn channels(&self) -> u16 {
        self.buffer.channels()
    }

    pub fn frames(&self) -> usize {
        self.buffer.frames()
    }

    /// Cuts a clip out of this asset, clamped to the asset bounds.
    pub fn clip(&self, offset: usize, len: usize) -> Clip {
        let offset = offset.min(self.frames());
        let len = len.min(self.frames() - offset);
        Clip {
            asset: self.clone(),
            offset,
            len,
        }
    }

    fn plane(&self, channel: u16) -> Option<&[f32]> {
        self.buffer.plane(channel)
    }
}

/// A contiguous region of an asset, ready to be placed on a track.
#[derive(Debug, Clone)]
pub struct Clip {
    asset: Asset,
    offset: usize,
    len: usize,
}

impl Clip {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone)]
struct Placement {
    at: usize,
    offset: usize,
    len: usize,
    asset: Asset,
}

impl Placement {
    fn end(&self) -> usize {
        self.at + self.len
    }
}

#[derive(Debug, Default)]
struct Timeline {
    /// Sorted by start frame and pairwise disjoint.
    placements: Vec<Placement>,
    cursor: usize,
}

impl Timeline {
    /// One frame past the last placed sample. Disjointness keeps the
    /// placements end-sorted too, so the last one bounds the stream.
    fn end(&self) -> usize {
        self.placements.last().map_or(0, Placement::end)
    }

    fn splice(&mut self, new: Placement) {
        let start = new.at;
        let stop = new.end();
        let mut rebuilt = Vec::with_capacity(self.placements.len() + 2);
        for placement in self.placements.drain(..) {
            if placement.end() <= start || placement.at >= stop {
                rebuilt.push(placement);
                continue;
            }
            if placement.at < start {
                rebuilt.push(Placement {
                    at: placement.at,
                    offset: placement.offset,
                    len: start - placement.at,
                    asset: placement.asset.clone(),
                });
            }
            if placement.end() > stop {
                let skip = stop - placement.at;
                rebuilt.push(Placement {
                    at: stop,
                    offset: placement.offset + skip,
                    len: placement.end() - stop,
                    asset: placement.asset,
                });
            }
        }
        rebuilt.push(new);
        rebuilt.sort_by_key(|placement| placement.at);
        self.placements = rebuilt;
    }

    /// Renders the next `frames` output frames, or `None` past the end.
    /// The final buffer is zero-padded to the full requested size.
    fn render(&mut self, channels: u16, frames: usize) -> Option<SampleBuffer> {
        let end = self.end();
        if self.cursor >= end {
            return None;
        }
        let start = self.cursor;
        let stop = start + frames;
        let mut out = SampleBuffer::silence(channels, frames);
        for placement in &self.placements {
            if placement.end() <= start {
                continue;
            }
            if placement.at >= stop {
                break;
            }
            let from = placement.at.max(start);
            let to = placement.end().min(stop);
            for channel in 0..channels.min(placement.asset.channels()) {
                let src = placement
                    .asset
                    .plane(channel)
                    .expect("asset plane within channel count");
                let dst = out.plane_mut(channel).expect("output plane within channel count");
                let src_from = placement.offset + (from - placement.at);
                dst[from - start..to - start]
                    .copy_from_slice(&src[src_from..src_from + (to - from)]);
            }
        }
        self.cursor = stop;
        Some(out)
    }
}

struct TrackShared {
    timeline: Mutex<Timeline>,
    /// Output buffer size override; zero follows the pipe's size.
    buffer_size: AtomicUsize,
}

/// Virtual pump over a clip timeline.
///
/// Clones share the same timeline, so a user-held clone keeps arranging
/// clips while a pipe-owned clone renders them. Rendering covers frame 0
/// up to the last placed frame in silence-padded fixed-size buffers and
/// then signals end-of-stream. The read cursor rewinds on each run.
pub struct Track {
    id: ComponentId,
    sample_rate: u32,
    channels: u16,
    shared: Arc<TrackShared>,
}

impl Clone for Track {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sample_rate: self.sample_rate,
            channels: self.channels,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Track {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            id: ComponentId::next(),
            sample_rate,
            channels,
            shared: Arc::new(TrackShared {
                timeline: Mutex::new(Timeline::default()),
                buffer_size: AtomicUsize::new(0),
            }),
        }
    }

    /// Places `clip` at absolute frame `at`, overwriting whatever part of
    /// older placements it covers.
    pub fn add_clip(&self, at: usize, clip: Clip) {
        if clip.is_empty() {
            return;
        }
        let mut timeline = self.lock_timeline();
        timeline.splice(Placement {
            at,
            offset: clip.offset,
            len: clip.len,
            asset: clip.asset,
        });
    }

    /// One frame past the last placed sample.
    pub fn frames(&self) -> usize {
        self.lock_timeline().end()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Deferred parameter switching the emitted buffer size at the next
    /// buffer boundary.
    pub fn buffer_size_param(&self, frames: usize) -> Param {
        let shared = Arc::clone(&self.shared);
        Param::new(self.id, move || {
            shared.buffer_size.store(frames, Ordering::Relaxed);
        })
    }

    fn lock_timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.shared.timeline.lock().expect("track timeline mutex poisoned")
    }
}

impl Component for Track {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none().with_reset()
    }

    fn reset(&mut self, _pipe: PipeId) -> Result<(), StageError> {
        self.lock_timeline().cursor = 0;
        Ok(())
    }
}

impl Pump for Track {
    fn bind(&mut self, _pipe: PipeId) -> Result<StreamSpec, StageError> {
        StreamSpec {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
        .validate()
    }

    fn produce(&mut self, buffer_size: usize) -> Result<SampleBuffer, StageError> {
        let frames = match self.shared.buffer_size.load(Ordering::Relaxed) {
            0 => buffer_size,
            frames => frames,
        };
        if frames == 0 {
            return Err(StageError::message("buffer size must be positive"));
        }
        self.lock_timeline()
            .render(self.channels, frames)
            .ok_or(StageError::EndOfStream)
    }
}
