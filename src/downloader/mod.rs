// Download core: locate tools, talk to the extraction service, track progress,
// tag the result, and run items one after another.

pub mod batch;
pub mod credentials;
pub mod diagnostics;
pub mod errors;
pub mod extractor;
pub mod format_selector;
pub mod installer;
pub mod models;
pub mod muxer;
pub mod pipeline;
pub mod progress;
pub mod sanitize;
pub mod tools;
pub mod utils;
pub mod validation;

pub use errors::DownloadError;
pub use extractor::{ExtractionClient, MediaExtractor};
pub use pipeline::DownloadPipeline;
