pub mod extract;
pub mod package;
pub mod sheets;

pub use extract::{Extraction, ExtractionItem, Extractor, ExtractorConfig, PartKind};
pub use package::{OoxmlPackage, PackageEntry};
