//! # Palisade Detectors - Independent Content Scorers
//!
//! The detector units of the screening pipeline. Each unit is a pure scorer
//! `score(content, metadata) -> DetectorResult` with a shared result shape,
//! so the worker pool runs them in parallel and the aggregator folds them
//! uniformly.
//!
//! ## Unit set
//!
//! | Unit | Category | Looks at |
//! |------|----------|----------|
//! | [`SignatureDetector`] | pattern | Literal injection/jailbreak/exfil signatures |
//! | [`EntropyDetector`] | symbolic | Shannon entropy, invisible characters |
//! | [`SimilarityDetector`] | similarity | Nearest neighbors in the external vector index |
//! | [`PiiDetector`] | pii | Emails, SSNs, phone numbers, credentials |
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        DETECTOR UNITS                         │
//! │                                                               │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐  │
//! │  │ SIGNATURE  │ │  ENTROPY   │ │ SIMILARITY │ │    PII     │  │
//! │  │            │ │            │ │            │ │            │  │
//! │  │ regex sigs │ │ H(X) > τ   │ │ embed +    │ │ identifier │  │
//! │  │ + redact   │ │ invisibles │ │ knn cache  │ │ shapes     │  │
//! │  └─────┬──────┘ └─────┬──────┘ └─────┬──────┘ └─────┬──────┘  │
//! │        └──────────────┴──────┬───────┴──────────────┘         │
//! │                              ▼                                │
//! │                      DetectorResult                           │
//! │            { matched, score, category, detail }               │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The set is closed by design: [`DetectorUnit`] is a tagged enum, and a new
//! detector type is a compile-time variant addition, not runtime
//! registration. External capabilities (embedding, vector search) enter
//! through the [`TextEmbedder`] and [`SimilaritySearch`] traits.
//!
//! Units must be side-effect-free and cancellable: a unit whose future is
//! dropped at its deadline simply produces no result and is excluded from
//! the vote, not counted as a zero score.

pub mod entropy;
pub mod pii;
pub mod result;
pub mod scrub;
pub mod signature;
pub mod similarity;
pub mod unit;

pub use entropy::EntropyDetector;
pub use pii::PiiDetector;
pub use result::{DetectorCategory, DetectorError, DetectorId, DetectorResult, Metadata};
pub use signature::SignatureDetector;
pub use similarity::{IndexMatch, SimilarityDetector, SimilaritySearch, TextEmbedder};
pub use unit::DetectorUnit;
