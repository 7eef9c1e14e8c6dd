//! Stateless-per-event rate and channel conversion.
//!
//! On `Start` the target block size is recomputed and the marker rewritten;
//! each frame is remixed to the target channel count (average for downmix,
//! duplicate for upmix) and resampled. Non-audio markers pass through
//! unchanged. `source_id`, `stream_start`, and `timestamp` are preserved;
//! `duration` is recomputed from the output sample count.

use rubato::{FftFixedIn, Resampler as RubatoResampler};
use scrive_events::{AudioFrame, Event, StreamMarker};

use crate::{Result, SAMPLE_RATE, TARGET_CHANNELS};

/// Wrapper for the rubato sinc resampler with buffering for variable input
/// sizes. Input shorter than one chunk is carried until enough accumulates.
struct SincResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
    chunk_size: usize,
}

impl SincResampler {
    fn new(from_rate: u32, to_rate: u32) -> Option<Self> {
        let chunk_size = 256;

        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            2,
            1,
        )
        .ok()?;

        Some(Self {
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        })
    }

    fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input_buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            if let Ok(resampled) = self.resampler.process(&[chunk], None) {
                if !resampled.is_empty() {
                    output.extend_from_slice(&resampled[0]);
                }
            }
        }
        output
    }
}

/// Pipeline stage converting every frame to the canonical rate and channel
/// count.
pub struct Resampler {
    target_rate: u32,
    target_channels: u16,
    source_rate: u32,
    source_channels: u16,
    inner: Option<SincResampler>,
}

impl Resampler {
    pub fn new() -> Self {
        Self::with_target(SAMPLE_RATE, TARGET_CHANNELS)
    }

    pub fn with_target(target_rate: u32, target_channels: u16) -> Self {
        Self {
            target_rate,
            target_channels,
            source_rate: target_rate,
            source_channels: target_channels,
            inner: None,
        }
    }

    /// Transform one event. Returns `None` for frames fully absorbed by the
    /// resampler's carry buffer.
    pub fn process(&mut self, event: Event) -> Result<Option<Event>> {
        match event {
            Event::Stream(StreamMarker::Start {
                source_id,
                timestamp,
                sample_rate,
                channels,
                block_size,
            }) => {
                if sample_rate == 0 || channels == 0 {
                    return Err(crate::AudioError::FormatError(format!(
                        "unusable stream parameters: rate={sample_rate} channels={channels}"
                    )));
                }
                self.source_rate = sample_rate;
                self.source_channels = channels;
                self.inner = if sample_rate != self.target_rate {
                    let resampler = SincResampler::new(sample_rate, self.target_rate);
                    if resampler.is_none() {
                        tracing::warn!(
                            from = sample_rate,
                            to = self.target_rate,
                            "sinc resampler unavailable, falling back to linear"
                        );
                    }
                    resampler
                } else {
                    None
                };
                let block_size =
                    (block_size as u64 * self.target_rate as u64 / sample_rate as u64) as u32;
                Ok(Some(Event::Stream(StreamMarker::Start {
                    source_id,
                    timestamp,
                    sample_rate: self.target_rate,
                    channels: self.target_channels,
                    block_size,
                })))
            }
            Event::Audio(frame) => Ok(self.process_frame(frame).map(Event::Audio)),
            other => Ok(Some(other)),
        }
    }

    fn process_frame(&mut self, frame: AudioFrame) -> Option<AudioFrame> {
        let mixed = remix(&frame.samples, frame.channels, self.target_channels);

        let resampled = if frame.sample_rate == self.target_rate {
            mixed
        } else if self.target_channels == 1 {
            match self.inner.as_mut() {
                Some(inner) => inner.process(&mixed),
                None => resample_linear(&mixed, frame.sample_rate, self.target_rate),
            }
        } else {
            // The sinc path is mono; interleaved multi-channel output uses
            // the linear interpolator per channel position.
            resample_linear(&mixed, frame.sample_rate, self.target_rate)
        };

        if resampled.is_empty() {
            return None;
        }

        let duration =
            resampled.len() as f64 / self.target_channels as f64 / self.target_rate as f64;
        Some(AudioFrame {
            source_id: frame.source_id,
            stream_start: frame.stream_start,
            timestamp: frame.timestamp,
            duration,
            sample_rate: self.target_rate,
            channels: self.target_channels,
            samples: resampled.into(),
            in_speech: frame.in_speech,
        })
    }
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Remix interleaved samples to the target channel count: average for
/// downmix, duplicate for upmix.
fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to || from == 0 {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;
    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);
    for chunk in samples.chunks_exact(from) {
        if to == 1 {
            output.push(chunk.iter().sum::<f32>() / from as f32);
        } else if from == 1 {
            output.extend(std::iter::repeat(chunk[0]).take(to));
        } else {
            for i in 0..to {
                output.push(chunk.get(i).copied().unwrap_or(0.0));
            }
        }
    }
    output
}

/// Linear interpolation resampling (fallback for stateless operation).
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx.fract() as f32;
        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrive_events::SpeechMarker;

    fn frame(samples: Vec<f32>, rate: u32, channels: u16) -> AudioFrame {
        AudioFrame::new("src", 0.0, 1.0, samples, rate, channels)
    }

    #[test]
    fn test_passthrough_at_target_rate() {
        let mut resampler = Resampler::new();
        let out = resampler
            .process(Event::Audio(frame(vec![0.5; 480], 16000, 1)))
            .unwrap()
            .unwrap();
        match out {
            Event::Audio(f) => {
                assert_eq!(f.sample_rate, 16000);
                assert_eq!(f.samples.len(), 480);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stereo_downmix_averages() {
        let mut resampler = Resampler::new();
        let out = resampler
            .process(Event::Audio(frame(vec![1.0, 0.0, 0.5, 0.5], 16000, 2)))
            .unwrap()
            .unwrap();
        match out {
            Event::Audio(f) => {
                assert_eq!(f.channels, 1);
                assert_eq!(f.samples.as_ref(), &[0.5, 0.5]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_start_marker_rewritten() {
        let mut resampler = Resampler::new();
        let start = Event::Stream(StreamMarker::Start {
            source_id: "src".into(),
            timestamp: 1.0,
            sample_rate: 48000,
            channels: 2,
            block_size: 1440,
        });
        let out = resampler.process(start).unwrap().unwrap();
        match out {
            Event::Stream(StreamMarker::Start {
                sample_rate,
                channels,
                block_size,
                ..
            }) => {
                assert_eq!(sample_rate, 16000);
                assert_eq!(channels, 1);
                assert_eq!(block_size, 480);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_downsample_48k_preserves_timestamp_and_duration() {
        let mut resampler = Resampler::new();
        resampler
            .process(Event::Stream(StreamMarker::Start {
                source_id: "src".into(),
                timestamp: 0.0,
                sample_rate: 48000,
                channels: 1,
                block_size: 1440,
            }))
            .unwrap();

        // Feed enough 48 kHz audio to flush the carry buffer.
        let mut total_out = 0usize;
        let mut saw_timestamp = false;
        for _ in 0..10 {
            if let Some(Event::Audio(f)) = resampler
                .process(Event::Audio(frame(vec![0.1; 1440], 48000, 1)))
                .unwrap()
            {
                assert_eq!(f.sample_rate, 16000);
                assert!((f.timestamp - 1.0).abs() < 1e-9);
                assert!((f.duration - f.samples.len() as f64 / 16000.0).abs() < 1e-9);
                total_out += f.samples.len();
                saw_timestamp = true;
            }
        }
        assert!(saw_timestamp);
        // 10 × 1440 samples at 48 kHz ≈ 4800 samples at 16 kHz, modulo carry.
        assert!(total_out > 3500 && total_out <= 4800, "got {total_out}");
    }

    #[test]
    fn test_markers_pass_through() {
        let mut resampler = Resampler::new();
        let marker = Event::Speech(SpeechMarker::SpeechStop {
            source_id: "src".into(),
            timestamp: 2.0,
            speech_start_time: 1.0,
            last_speech_frame_time: 1.9,
        });
        let out = resampler.process(marker).unwrap().unwrap();
        assert!(matches!(out, Event::Speech(_)));
    }

    #[test]
    fn test_zero_rate_start_is_format_error() {
        let mut resampler = Resampler::new();
        let start = Event::Stream(StreamMarker::Start {
            source_id: "src".into(),
            timestamp: 0.0,
            sample_rate: 0,
            channels: 1,
            block_size: 480,
        });
        assert!(resampler.process(start).is_err());
    }
}
