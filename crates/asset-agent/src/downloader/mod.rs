//! Fetch, verify and expand stages of the install pipeline.
//!
//! Each stage is a standalone function of its inputs so it can be exercised
//! against fixture files without a store or a coordinator.

mod archive;
mod checksum;
mod fetch;

pub use archive::{detect_type, ArchiveExtractor, ArchiveType, HEADER_SIZE};
pub use checksum::{compute_sha512, verify_checksum};
pub use fetch::{Fetcher, HttpFetcher};
