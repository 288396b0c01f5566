//! Structure templates: sections, the 12-template registry, and selection.

pub mod registry;
pub mod selector;
pub mod types;

pub use registry::TemplateRegistry;
pub use selector::{apply_s2_enforcement, select_template, TemplateSelectionResult};
pub use types::{SectionSkipRule, StructureSection, StructureTemplate};
