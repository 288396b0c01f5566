//! Three-tier structure labeling: the LLM labeler, the deterministic RED
//! enforcer, and the all-GREEN recovery scanner.

pub mod enforcer;
pub mod labeler;
pub mod scanner;
pub mod types;

pub use enforcer::enforce;
pub use labeler::{label, label_text_only, LabelMetadata, StructureLabelResult};
pub use scanner::{scan_yellow_triggers, YellowUpgrade};
pub use types::{LabelStats, LabelTier, LabeledSegment, SegmentLabel};
