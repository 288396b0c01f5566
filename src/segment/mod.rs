//! Meaning segmentation: the rule-based splitter and the LLM refiner.

pub mod refiner;
pub mod segmenter;

pub use refiner::{refine, RefineResult, MIN_LENGTH_DEFAULT};
pub use segmenter::{segment, segment_with, SegmenterConfig};
