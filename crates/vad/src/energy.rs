//! Energy-based speech classifier: RMS threshold plus silence hangover.
//!
//! A window at or above the threshold opens (or sustains) a speech region;
//! below-threshold windows inside a region count toward the configured
//! silence duration before the region closes. The hangover prevents word
//! endings and short pauses from splitting an utterance.

use crate::{BoundarySignal, Result, SpeechClassifier, VAD_SAMPLE_RATE, VAD_WINDOW};

pub struct EnergyClassifier {
    /// RMS amplitude at or above which a window counts as speech.
    threshold: f32,
    /// Below-threshold windows tolerated before the region ends.
    hangover_windows: u32,
    in_speech: bool,
    silent_windows: u32,
}

impl EnergyClassifier {
    pub fn new(threshold: f32, min_silence_ms: u32) -> Self {
        let window_ms = VAD_WINDOW as f32 * 1000.0 / VAD_SAMPLE_RATE as f32;
        let hangover_windows = (min_silence_ms as f32 / window_ms).ceil() as u32;
        Self {
            threshold,
            hangover_windows: hangover_windows.max(1),
            in_speech: false,
            silent_windows: 0,
        }
    }

    fn rms(window: &[f32]) -> f32 {
        if window.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = window.iter().map(|s| s * s).sum();
        (sum_sq / window.len() as f32).sqrt()
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self::new(0.02, 1000)
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn classify(&mut self, window: &[f32]) -> Result<BoundarySignal> {
        let rms = Self::rms(window);

        if rms >= self.threshold {
            self.silent_windows = 0;
            if !self.in_speech {
                self.in_speech = true;
                return Ok(BoundarySignal::start());
            }
            return Ok(BoundarySignal::NONE);
        }

        if self.in_speech {
            self.silent_windows += 1;
            if self.silent_windows >= self.hangover_windows {
                self.in_speech = false;
                self.silent_windows = 0;
                return Ok(BoundarySignal::end());
            }
        }
        Ok(BoundarySignal::NONE)
    }

    fn reset(&mut self) {
        self.in_speech = false;
        self.silent_windows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud() -> Vec<f32> {
        vec![0.5; VAD_WINDOW]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; VAD_WINDOW]
    }

    #[test]
    fn test_start_on_first_loud_window() {
        let mut vad = EnergyClassifier::new(0.02, 64);
        assert_eq!(vad.classify(&quiet()).unwrap(), BoundarySignal::NONE);
        assert_eq!(vad.classify(&loud()).unwrap(), BoundarySignal::start());
        // Sustained speech produces no further transitions.
        assert_eq!(vad.classify(&loud()).unwrap(), BoundarySignal::NONE);
    }

    #[test]
    fn test_end_after_hangover() {
        // 64 ms silence tolerance = 2 windows.
        let mut vad = EnergyClassifier::new(0.02, 64);
        vad.classify(&loud()).unwrap();
        assert_eq!(vad.classify(&quiet()).unwrap(), BoundarySignal::NONE);
        assert_eq!(vad.classify(&quiet()).unwrap(), BoundarySignal::end());
        // Back to idle; more silence is uneventful.
        assert_eq!(vad.classify(&quiet()).unwrap(), BoundarySignal::NONE);
    }

    #[test]
    fn test_speech_resumes_within_hangover() {
        let mut vad = EnergyClassifier::new(0.02, 96);
        vad.classify(&loud()).unwrap();
        vad.classify(&quiet()).unwrap();
        vad.classify(&quiet()).unwrap();
        // Speech returns before the third silent window; no end, no restart.
        assert_eq!(vad.classify(&loud()).unwrap(), BoundarySignal::NONE);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut vad = EnergyClassifier::new(0.02, 64);
        vad.classify(&loud()).unwrap();
        vad.reset();
        // After reset the next loud window is a fresh start.
        assert_eq!(vad.classify(&loud()).unwrap(), BoundarySignal::start());
    }

    #[test]
    fn test_empty_window_is_silence() {
        let mut vad = EnergyClassifier::default();
        assert_eq!(vad.classify(&[]).unwrap(), BoundarySignal::NONE);
    }
}
