//! Scan-window accumulation for in-speech audio.
//!
//! Frames flagged `in_speech` accumulate until a full scan window is
//! available; the remainder carries over. When speech ends, whatever is left
//! is released as a short final window, provided it meets the minimum
//! segment duration. On `SpeechStart` the buffer seeds itself with pre-roll
//! frames drained from the [`AudioRing`] so transcription sees audio from
//! before the detected onset.

use scrive_audio::AudioRing;
use scrive_events::{AudioFrame, Event, SpeechMarker};

use crate::{AudioWindow, TranscriberConfig};

const SAMPLE_RATE: u32 = 16000;

pub struct ScanBuffer {
    scan_samples: usize,
    min_segment_samples: usize,
    pre_buffer_samples: usize,
    samples: Vec<f32>,
    /// Timestamp of the first sample currently buffered.
    start_time: f64,
    source_id: String,
    in_speech: bool,
    /// Tail of the previously released window, prepended to the next one.
    carry: Vec<f32>,
}

impl ScanBuffer {
    pub fn new(config: &TranscriberConfig) -> Self {
        Self {
            scan_samples: (config.seconds_per_scan * SAMPLE_RATE as f64) as usize,
            min_segment_samples: (config.min_segment_duration * SAMPLE_RATE as f64) as usize,
            pre_buffer_samples: (config.pre_buffer_seconds * SAMPLE_RATE as f64) as usize,
            samples: Vec::new(),
            start_time: 0.0,
            source_id: String::new(),
            in_speech: false,
            carry: Vec::new(),
        }
    }

    /// Feed one post-VAD event; returns zero or more ready windows.
    pub fn process(&mut self, event: &Event, ring: &mut AudioRing) -> Vec<AudioWindow> {
        match event {
            Event::Speech(SpeechMarker::SpeechStart {
                speech_start_time, ..
            }) => {
                self.in_speech = true;
                // The marker's start time already includes the pad, so the
                // ring drain recovers exactly the pre-roll span.
                for frame in ring.drain_from(*speech_start_time) {
                    self.accumulate(&frame);
                }
                Vec::new()
            }
            Event::Audio(frame) => {
                if frame.in_speech {
                    self.accumulate(frame);
                    self.release_full_windows()
                } else {
                    ring.push(frame.clone());
                    Vec::new()
                }
            }
            Event::Speech(SpeechMarker::SpeechStop { .. }) => {
                self.in_speech = false;
                self.flush().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn buffered_samples(&self) -> usize {
        self.samples.len()
    }

    fn accumulate(&mut self, frame: &AudioFrame) {
        if self.samples.is_empty() {
            self.start_time = frame.timestamp;
            self.source_id = frame.source_id.clone();
        }
        self.samples.extend_from_slice(&frame.samples);
    }

    fn release_full_windows(&mut self) -> Vec<AudioWindow> {
        let mut windows = Vec::new();
        while self.samples.len() >= self.scan_samples {
            let released: Vec<f32> = self.samples.drain(..self.scan_samples).collect();
            let released_duration = released.len() as f64 / SAMPLE_RATE as f64;
            windows.push(self.build_window(released));
            self.start_time += released_duration;
        }
        windows
    }

    /// Release whatever is accumulated as a short final window, or discard
    /// it when shorter than the minimum segment duration.
    pub fn flush(&mut self) -> Option<AudioWindow> {
        if self.samples.is_empty() {
            return None;
        }
        if self.samples.len() < self.min_segment_samples {
            tracing::debug!(
                samples = self.samples.len(),
                min = self.min_segment_samples,
                "discarding sub-minimum final window"
            );
            self.samples.clear();
            self.carry.clear();
            return None;
        }
        let released = std::mem::take(&mut self.samples);
        let window = self.build_window(released);
        self.carry.clear();
        Some(window)
    }

    fn build_window(&mut self, released: Vec<f32>) -> AudioWindow {
        let overlap = self.carry.len();
        let mut samples = std::mem::take(&mut self.carry);
        samples.extend_from_slice(&released);

        // Keep the tail of this window as overlap for the next.
        if self.pre_buffer_samples > 0 {
            let keep = released.len().min(self.pre_buffer_samples);
            self.carry = released[released.len() - keep..].to_vec();
        }

        let start_time = self.start_time - overlap as f64 / SAMPLE_RATE as f64;
        let end_time =
            self.start_time + released.len() as f64 / SAMPLE_RATE as f64;
        AudioWindow {
            samples,
            sample_rate: SAMPLE_RATE,
            channels: 1,
            start_time,
            end_time,
            source_id: self.source_id.clone(),
        }
    }
}
