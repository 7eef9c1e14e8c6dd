//! Time-windowed buffer of recent frames for pre-roll recovery.
//!
//! The scan buffer seeds itself from here when speech starts, so the
//! transcriber sees audio from before the detected onset without replaying
//! the source. Single producer (the VAD gate side), single consumer.

use std::collections::VecDeque;

use scrive_events::AudioFrame;

pub struct AudioRing {
    frames: VecDeque<AudioFrame>,
    /// Retention window in seconds.
    window: f64,
}

impl AudioRing {
    /// `window` must cover at least `pad_ms` plus one scan window.
    pub fn new(window: f64) -> Self {
        Self {
            frames: VecDeque::new(),
            window: window.max(0.0),
        }
    }

    /// Append a frame and evict entries older than the retention window,
    /// measured against this frame's timestamp.
    pub fn push(&mut self, frame: AudioFrame) {
        let horizon = frame.timestamp - self.window;
        self.frames.push_back(frame);
        while let Some(front) = self.frames.front() {
            if front.timestamp + front.duration < horizon {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    /// Remove and return all frames with `timestamp >= t`, in insertion
    /// order. Frames older than `t` stay for later eviction.
    pub fn drain_from(&mut self, t: f64) -> Vec<AudioFrame> {
        let split = self.frames.partition_point(|f| f.timestamp < t);
        self.frames.split_off(split).into()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total seconds of audio currently held.
    pub fn duration(&self) -> f64 {
        self.frames.iter().map(|f| f.duration).sum()
    }
}
