//! The VAD gate: partitions a frame stream into speech regions.
//!
//! Wraps a [`SpeechClassifier`] and turns its window-level boundary signals
//! into `SpeechStart`/`SpeechStop` markers with the ordering the rest of the
//! pipeline relies on:
//!
//! - `SpeechStart` is emitted *before* the triggering frame, which already
//!   carries `in_speech = true`;
//! - `SpeechStop` is emitted *after* the closing frame, which carries
//!   `in_speech = false`;
//! - a `Stop` marker arriving mid-speech synthesizes a `SpeechStop` first.
//!
//! `speech_start_time` is the trigger frame timestamp minus the pad, so the
//! marker already points at the padded onset.

use scrive_events::{AudioFrame, Event, SpeechMarker, StreamMarker};

use crate::{BoundarySignal, Result, SpeechClassifier, VadError, VAD_WINDOW};

/// Consecutive classifier failures tolerated before escalation.
const MAX_CLASSIFIER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct VadGateConfig {
    /// Classifier decision threshold, reported on `SpeechStart` markers.
    pub threshold: f32,
    /// Pre-roll pad applied to region boundaries.
    pub pad_ms: u32,
    /// Silence duration the classifier waits out before ending a region.
    pub silence_ms: u32,
}

impl Default for VadGateConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            pad_ms: 500,
            silence_ms: 1000,
        }
    }
}

pub struct VadGate {
    classifier: Box<dyn SpeechClassifier>,
    config: VadGateConfig,
    /// Passthrough treats the whole stream as one speech region (rescan).
    passthrough: bool,
    in_speech: bool,
    speech_start_time: f64,
    last_in_speech_frame: f64,
    consecutive_failures: u32,
    window: Vec<f32>,
}

impl VadGate {
    pub fn new(classifier: Box<dyn SpeechClassifier>, config: VadGateConfig) -> Self {
        Self {
            classifier,
            config,
            passthrough: false,
            in_speech: false,
            speech_start_time: 0.0,
            last_in_speech_frame: 0.0,
            consecutive_failures: 0,
            window: vec![0.0; VAD_WINDOW],
        }
    }

    /// A gate that opens on `Start` and closes on `Stop`, used when replaying
    /// recorded audio where every frame should reach the transcriber.
    pub fn passthrough(classifier: Box<dyn SpeechClassifier>, config: VadGateConfig) -> Self {
        let mut gate = Self::new(classifier, config);
        gate.passthrough = true;
        gate
    }

    /// Thresholds are policy inputs; changing them resets the classifier.
    pub fn set_config(&mut self, config: VadGateConfig) {
        self.config = config;
        self.classifier.reset();
        self.consecutive_failures = 0;
    }

    pub fn config(&self) -> VadGateConfig {
        self.config
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Process one event, appending the resulting events in emission order.
    ///
    /// A classifier failure leaves the frame's `in_speech` unchanged and is
    /// logged; three consecutive failures escalate as an error.
    pub fn process(&mut self, event: Event, out: &mut Vec<Event>) -> Result<()> {
        match event {
            Event::Audio(frame) => self.process_frame(frame, out),
            Event::Stream(marker @ StreamMarker::Start { .. }) => {
                let source_id = marker.source_id().to_string();
                let timestamp = marker.timestamp();
                out.push(Event::Stream(marker));
                if self.passthrough && !self.in_speech {
                    self.in_speech = true;
                    self.speech_start_time = timestamp;
                    self.last_in_speech_frame = timestamp;
                    out.push(Event::Speech(SpeechMarker::SpeechStart {
                        source_id,
                        timestamp,
                        speech_start_time: timestamp,
                        threshold: self.config.threshold,
                        pad_ms: 0,
                        silence_ms: self.config.silence_ms,
                    }));
                }
                Ok(())
            }
            Event::Stream(StreamMarker::Stop { .. }) => {
                if self.in_speech {
                    self.in_speech = false;
                    out.push(Event::Speech(SpeechMarker::SpeechStop {
                        source_id: event.source_id().to_string(),
                        timestamp: self.last_in_speech_frame,
                        speech_start_time: self.speech_start_time,
                        last_speech_frame_time: self.last_speech_frame_time(),
                    }));
                }
                out.push(event);
                Ok(())
            }
            other => {
                out.push(other);
                Ok(())
            }
        }
    }

    fn last_speech_frame_time(&self) -> f64 {
        if self.passthrough {
            self.last_in_speech_frame
        } else {
            self.last_in_speech_frame - self.config.pad_ms as f64 / 1000.0
        }
    }

    fn process_frame(&mut self, mut frame: AudioFrame, out: &mut Vec<Event>) -> Result<()> {
        if self.passthrough {
            frame.in_speech = true;
            self.last_in_speech_frame = frame.timestamp;
            out.push(Event::Audio(frame));
            return Ok(());
        }

        self.fill_window(&frame);
        let signal = match self.classifier.classify(&self.window) {
            Ok(signal) => {
                self.consecutive_failures = 0;
                signal
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(error = %e, failures = self.consecutive_failures, "classifier failure, forwarding frame unchanged");
                if self.consecutive_failures >= MAX_CLASSIFIER_FAILURES {
                    return Err(VadError::ClassifierFailed(self.consecutive_failures));
                }
                frame.in_speech = self.in_speech;
                if self.in_speech {
                    self.last_in_speech_frame = frame.timestamp;
                }
                out.push(Event::Audio(frame));
                return Ok(());
            }
        };

        self.apply_signal(signal, frame, out);
        Ok(())
    }

    fn apply_signal(&mut self, signal: BoundarySignal, mut frame: AudioFrame, out: &mut Vec<Event>) {
        if signal.start && !self.in_speech {
            self.in_speech = true;
            self.speech_start_time = frame.timestamp - self.config.pad_ms as f64 / 1000.0;
            out.push(Event::Speech(SpeechMarker::SpeechStart {
                source_id: frame.source_id.clone(),
                timestamp: frame.timestamp,
                speech_start_time: self.speech_start_time,
                threshold: self.config.threshold,
                pad_ms: self.config.pad_ms,
                silence_ms: self.config.silence_ms,
            }));
        }

        let ending = signal.end && self.in_speech;
        if ending {
            self.in_speech = false;
        }
        frame.in_speech = self.in_speech;
        if self.in_speech {
            self.last_in_speech_frame = frame.timestamp;
        }
        let source_id = frame.source_id.clone();
        let timestamp = frame.timestamp;
        out.push(Event::Audio(frame));

        if ending {
            out.push(Event::Speech(SpeechMarker::SpeechStop {
                source_id,
                timestamp,
                speech_start_time: self.speech_start_time,
                last_speech_frame_time: self.last_speech_frame_time(),
            }));
        }
    }

    /// Prepare the fixed 512-sample classifier window: tail-trim longer
    /// frames, zero-pad shorter ones. Multi-channel frames use channel 0.
    fn fill_window(&mut self, frame: &AudioFrame) {
        let channels = frame.channels.max(1) as usize;
        let mut n = 0;
        for chunk in frame.samples.chunks(channels) {
            if n == VAD_WINDOW {
                break;
            }
            self.window[n] = chunk[0];
            n += 1;
        }
        for slot in self.window[n..].iter_mut() {
            *slot = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnergyClassifier;

    const FRAME_SECONDS: f64 = 0.03;

    fn frame_at(t: f64, amplitude: f32) -> Event {
        Event::Audio(AudioFrame::new(
            "src",
            0.0,
            t,
            vec![amplitude; 480],
            16000,
            1,
        ))
    }

    fn run_stream(gate: &mut VadGate, events: impl IntoIterator<Item = Event>) -> Vec<Event> {
        let mut out = Vec::new();
        for event in events {
            gate.process(event, &mut out).unwrap();
        }
        out
    }

    /// 10 s stream with one 3 s burst starting at t = 2 s, 30 ms frames.
    fn burst_stream() -> Vec<Event> {
        let mut events = vec![Event::Stream(StreamMarker::Start {
            source_id: "src".into(),
            timestamp: 0.0,
            sample_rate: 16000,
            channels: 1,
            block_size: 480,
        })];
        let frames = (10.0 / FRAME_SECONDS) as usize;
        for i in 0..frames {
            let t = i as f64 * FRAME_SECONDS;
            let amplitude = if (2.0..5.0).contains(&t) { 0.5 } else { 0.0 };
            events.push(frame_at(t, amplitude));
        }
        events.push(Event::Stream(StreamMarker::stop("src")));
        events
    }

    #[test]
    fn test_single_burst_markers_and_flags() {
        let config = VadGateConfig {
            threshold: 0.05,
            pad_ms: 500,
            silence_ms: 1000,
        };
        let classifier = EnergyClassifier::new(config.threshold, config.silence_ms);
        let mut gate = VadGate::new(Box::new(classifier), config);

        let out = run_stream(&mut gate, burst_stream());

        let starts: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                Event::Speech(SpeechMarker::SpeechStart {
                    speech_start_time, ..
                }) => Some(*speech_start_time),
                _ => None,
            })
            .collect();
        let stops: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                Event::Speech(SpeechMarker::SpeechStop {
                    last_speech_frame_time,
                    ..
                }) => Some(*last_speech_frame_time),
                _ => None,
            })
            .collect();

        assert_eq!(starts.len(), 1, "expected exactly one SpeechStart");
        assert_eq!(stops.len(), 1, "expected exactly one SpeechStop");
        assert!(
            (starts[0] - 1.5).abs() < 0.1,
            "speech_start_time {} not near 1.5",
            starts[0]
        );
        assert!(
            (stops[0] - 5.5).abs() < 0.15,
            "last_speech_frame_time {} not near 5.5",
            stops[0]
        );

        // Every frame between the markers is flagged (the region-closing
        // frame itself already carries false and is followed directly by
        // SpeechStop); nothing outside the region is flagged.
        let mut inside = false;
        for (i, event) in out.iter().enumerate() {
            match event {
                Event::Speech(SpeechMarker::SpeechStart { .. }) => inside = true,
                Event::Speech(SpeechMarker::SpeechStop { .. }) => inside = false,
                Event::Audio(frame) => {
                    if inside && !frame.in_speech {
                        assert!(
                            matches!(out.get(i + 1), Some(Event::Speech(SpeechMarker::SpeechStop { .. }))),
                            "unflagged frame at {} inside the speech region",
                            frame.timestamp
                        );
                    }
                    if !inside {
                        assert!(
                            !frame.in_speech,
                            "flagged frame at {} outside the speech region",
                            frame.timestamp
                        );
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_start_marker_precedes_trigger_frame() {
        let config = VadGateConfig::default();
        let classifier = EnergyClassifier::new(config.threshold, config.silence_ms);
        let mut gate = VadGate::new(Box::new(classifier), config);

        let mut out = Vec::new();
        gate.process(frame_at(1.0, 0.5), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0],
            Event::Speech(SpeechMarker::SpeechStart { .. })
        ));
        match &out[1] {
            Event::Audio(frame) => assert!(frame.in_speech),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stop_mid_speech_synthesizes_speech_stop() {
        let config = VadGateConfig::default();
        let classifier = EnergyClassifier::new(config.threshold, config.silence_ms);
        let mut gate = VadGate::new(Box::new(classifier), config);

        let mut out = Vec::new();
        gate.process(frame_at(1.0, 0.5), &mut out).unwrap();
        out.clear();
        gate.process(Event::Stream(StreamMarker::stop("src")), &mut out)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[0],
            Event::Speech(SpeechMarker::SpeechStop { .. })
        ));
        assert!(matches!(out[1], Event::Stream(StreamMarker::Stop { .. })));
    }

    #[test]
    fn test_passthrough_opens_on_start_and_closes_on_stop() {
        let config = VadGateConfig::default();
        let classifier = EnergyClassifier::new(config.threshold, config.silence_ms);
        let mut gate = VadGate::passthrough(Box::new(classifier), config);

        let out = run_stream(
            &mut gate,
            vec![
                Event::Stream(StreamMarker::Start {
                    source_id: "src".into(),
                    timestamp: 0.0,
                    sample_rate: 16000,
                    channels: 1,
                    block_size: 480,
                }),
                frame_at(0.0, 0.0),
                frame_at(0.03, 0.0),
                Event::Stream(StreamMarker::stop("src")),
            ],
        );

        assert!(matches!(out[0], Event::Stream(StreamMarker::Start { .. })));
        assert!(matches!(
            out[1],
            Event::Speech(SpeechMarker::SpeechStart { .. })
        ));
        for event in &out {
            if let Event::Audio(frame) = event {
                assert!(frame.in_speech, "passthrough frames are all in speech");
            }
        }
        let n = out.len();
        assert!(matches!(
            out[n - 2],
            Event::Speech(SpeechMarker::SpeechStop { .. })
        ));
        assert!(matches!(out[n - 1], Event::Stream(StreamMarker::Stop { .. })));
    }

    struct FailingClassifier;

    impl SpeechClassifier for FailingClassifier {
        fn classify(&mut self, _window: &[f32]) -> Result<BoundarySignal> {
            Err(VadError::InferenceError("model exploded".into()))
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_three_failures_escalate() {
        let mut gate = VadGate::new(Box::new(FailingClassifier), VadGateConfig::default());
        let mut out = Vec::new();

        assert!(gate.process(frame_at(0.0, 0.1), &mut out).is_ok());
        assert!(gate.process(frame_at(0.03, 0.1), &mut out).is_ok());
        let err = gate.process(frame_at(0.06, 0.1), &mut out).unwrap_err();
        assert!(matches!(err, VadError::ClassifierFailed(3)));
        // The two tolerated failures still forwarded their frames.
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_set_config_resets_classifier() {
        let config = VadGateConfig::default();
        let classifier = EnergyClassifier::new(config.threshold, config.silence_ms);
        let mut gate = VadGate::new(Box::new(classifier), config);

        let mut out = Vec::new();
        gate.process(frame_at(1.0, 0.5), &mut out).unwrap();
        assert!(gate.in_speech());

        gate.set_config(VadGateConfig {
            threshold: 0.1,
            ..config
        });
        // Gate state machine is independent of the classifier reset; the
        // next end signal will still close the open region.
        assert!(gate.in_speech());
        assert!((gate.config().threshold - 0.1).abs() < f32::EPSILON);
    }
}
