// Catalog module - groups of images discovered under the content root
mod error;
mod group;
pub mod ingest;
mod types;

pub use error::CatalogError;
pub use group::{Group, Registry};
pub use ingest::{IngestOutcome, ScanReport, ingest_file, probe_media, scan_group, settle_name};
pub use types::*;

use std::sync::Arc;

pub type SharedGroup = Arc<Group>;
pub type SharedRegistry = Arc<Registry>;
