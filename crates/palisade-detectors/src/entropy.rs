//! Symbolic/structural heuristic scorer.
//!
//! Two cheap statistical checks that need no external engine:
//!
//! 1. **Shannon entropy** over the character distribution, targeting
//!    gradient-optimized adversarial suffixes. Natural prose sits around
//!    3.5-4.5 bits/char; adversarial gibberish and encoded payloads run
//!    higher. Instead of a binary flag, the score ramps with the distance
//!    above the threshold so the weighted vote gets a usable signal.
//! 2. **Invisible characters**: zero-width and directional-formatting code
//!    points used to smuggle instructions past human review.
//!
//! Known false-positive sources for the entropy check: base64 blobs, UUIDs,
//! hashes, and dense multilingual text. That is why this unit votes under
//! the symbolic category with its own weight rather than blocking outright.

use crate::result::{DetectorCategory, DetectorId, DetectorResult};
use std::collections::HashMap;
use std::time::Duration;

/// Entropy above this many bits/char is treated as suspicious.
pub const ENTROPY_THRESHOLD: f64 = 4.5;

/// Entropy at or above this is scored as maximally suspicious.
/// Random ASCII tops out around 6.5 bits/char.
const ENTROPY_CEILING: f64 = 6.5;

/// Strings shorter than this carry too few samples for a meaningful
/// distribution and are skipped.
pub const MIN_ANALYSIS_LENGTH: usize = 10;

/// Shannon entropy of `text` in bits per character.
pub fn shannon_entropy(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in text.chars() {
        *freq.entry(c).or_insert(0) += 1;
        total += 1;
    }

    let total = total as f64;
    freq.values()
        .map(|&count| {
            let p = count as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn invisible_char_count(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            matches!(c,
                '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{FEFF}')
        })
        .count()
}

/// Entropy and structural heuristic detector.
pub struct EntropyDetector {
    threshold: f64,
}

impl EntropyDetector {
    /// Creates the detector with the default entropy threshold.
    pub fn new() -> Self {
        Self {
            threshold: ENTROPY_THRESHOLD,
        }
    }

    /// Overrides the entropy threshold (bits/char).
    pub fn with_threshold(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Scores `content` on entropy and invisible-character structure.
    pub fn evaluate(&self, content: &str) -> DetectorResult {
        let mut score = 0.0f64;
        let mut details: Vec<String> = Vec::new();

        if content.len() >= MIN_ANALYSIS_LENGTH {
            let entropy = shannon_entropy(content);
            if entropy > self.threshold {
                let span = (ENTROPY_CEILING - self.threshold).max(f64::EPSILON);
                score = ((entropy - self.threshold) / span).clamp(0.0, 1.0);
                details.push(format!("high entropy: {entropy:.2} bits/char"));
            }
        }

        let invisible = invisible_char_count(content);
        if invisible > 0 {
            let structural = (0.4 + 0.1 * invisible as f64).min(1.0);
            if structural > score {
                score = structural;
            }
            details.push(format!("{invisible} invisible characters"));
        }

        DetectorResult {
            detector: DetectorId::Entropy,
            matched: !details.is_empty(),
            score,
            category: DetectorCategory::Symbolic,
            detail: details.join("; "),
            latency: Duration::ZERO,
        }
    }
}

impl Default for EntropyDetector {
    fn default() -> Self {
        Self::new()
    }
}
