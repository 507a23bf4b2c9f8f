//! Literal signature matcher.
//!
//! Scores content against a curated table of injection, jailbreak, and
//! exfiltration signatures. Each signature carries its own confidence,
//! calibrated so classic instruction-override phrasing scores near the top
//! of the range and weaker indicators (encoding tricks) score lower. The
//! final score is the strongest matching signature; every match contributes
//! to the evidence detail.
//!
//! The matcher also exposes [`SignatureDetector::redact`], which the
//! sanitize mitigation uses to blank out the flagged spans while leaving the
//! rest of the content intact.

use crate::result::{DetectorCategory, DetectorId, DetectorResult};
use regex::Regex;
use std::time::Duration;

/// Replacement text for redacted spans.
const REDACTION_MARK: &str = "[redacted]";

struct Signature {
    pattern: Regex,
    confidence: f64,
    description: &'static str,
}

/// Regex-based signature scorer for known adversarial phrasing.
pub struct SignatureDetector {
    signatures: Vec<Signature>,
}

impl SignatureDetector {
    /// Builds the detector with the default signature table.
    pub fn new() -> Self {
        Self {
            signatures: Self::build_signatures(),
        }
    }

    fn build_signatures() -> Vec<Signature> {
        // Confidence calibration: >=0.9 for direct override phrasing that
        // almost never appears in benign traffic, 0.8-0.9 for role and
        // persona manipulation, below 0.8 for indicators with legitimate
        // uses (encoding chatter).
        let table: [(&str, f64, &str); 11] = [
            (
                r"(?i)ignore\s+(?:all\s+)?(?:previous|prior|above|earlier)\s+(?:instructions?|prompts?|rules?|directions?)",
                0.95,
                "instruction override",
            ),
            (
                r"(?i)disregard\s+(?:all\s+)?(?:your\s+)?(?:previous|prior|above)\s+(?:instructions?|prompts?|rules?|guidelines?)",
                0.95,
                "instruction override",
            ),
            (
                r"(?i)forget\s+(?:everything|all|what)\s+(?:you|i)?\s*(?:know|said|told|learned)",
                0.9,
                "context reset attempt",
            ),
            (
                r"(?i)(?:show|reveal|display|print|output|repeat|leak)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+)?prompt",
                0.9,
                "system prompt extraction",
            ),
            (
                r"(?i)what\s+(?:are|is)\s+(?:your|the)\s+(?:system\s+)?(?:instructions?|prompt|rules?)",
                0.85,
                "system prompt probing",
            ),
            (
                r"(?i)you\s+are\s+now\s+(?:a|an|in)\s+\w+\s+mode",
                0.85,
                "mode-switch hijack",
            ),
            (
                r"(?i)(?:pretend|act|imagine|roleplay)\s+(?:you(?:'?re| are)|as if you(?:'?re| are))\s+(?:not\s+)?(?:an?\s+)?ai",
                0.8,
                "persona hijack",
            ),
            (
                r"(?i)\b(?:DAN|do\s+anything\s+now|jailbreak|developer\s+mode)\b",
                0.9,
                "known jailbreak phrasing",
            ),
            (
                r"(?i)(?:send|post|upload|transmit|exfiltrate)\s+(?:this\s+)?(?:data|info|information|contents?|secrets?)\s+to",
                0.85,
                "exfiltration directive",
            ),
            (
                r"(?i)(?:base64|rot13|hex)\s*(?:encode|decode|convert)",
                0.7,
                "encoding evasion",
            ),
            (
                r"(?i)respond\s+without\s+(?:any\s+)?(?:safety|filter|restriction)s?",
                0.85,
                "safety bypass request",
            ),
        ];

        table
            .into_iter()
            .map(|(pattern, confidence, description)| Signature {
                pattern: Regex::new(pattern).unwrap(),
                confidence,
                description,
            })
            .collect()
    }

    /// Scores `content` against the signature table.
    ///
    /// Returns the strongest matching signature's confidence as the score,
    /// with every matching signature named in the detail.
    pub fn evaluate(&self, content: &str) -> DetectorResult {
        let mut best = 0.0f64;
        let mut hits: Vec<&'static str> = Vec::new();

        for signature in &self.signatures {
            if signature.pattern.is_match(content) {
                best = best.max(signature.confidence);
                hits.push(signature.description);
            }
        }

        DetectorResult {
            detector: DetectorId::Signature,
            matched: !hits.is_empty(),
            score: best,
            category: DetectorCategory::Pattern,
            detail: hits.join("; "),
            latency: Duration::ZERO,
        }
    }

    /// Replaces every span matched by any signature with a redaction mark.
    ///
    /// Used by the sanitize mitigation: the flagged phrasing is removed
    /// while the surrounding content passes through.
    pub fn redact(&self, content: &str) -> String {
        let mut output = content.to_string();
        for signature in &self.signatures {
            output = signature
                .pattern
                .replace_all(&output, REDACTION_MARK)
                .into_owned();
        }
        output
    }
}

impl Default for SignatureDetector {
    fn default() -> Self {
        Self::new()
    }
}
