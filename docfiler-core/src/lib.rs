// Docfiler Core Library
//
// Watches an intake directory for scanned forms, reads order number, job name
// and dealer name off page one, and files each document under its dealer.

pub mod types;
pub mod error;
pub mod config;
pub mod sanitizer;
pub mod classifier;
pub mod extraction;
pub mod relocator;
pub mod queue;
pub mod settle;
pub mod parking;
pub mod processor;
pub mod dispatcher;

// Re-export main types and functions for easy use
pub use types::*;
pub use error::{FilerError, FilerResult, ParkReason};
pub use config::FilerConfig;
pub use sanitizer::sanitize;
pub use classifier::DealerClassifier;
pub use extraction::{OcrEngine, PageRasterizer, RegionExtractor};
pub use relocator::{plan_relocation, FileRelocator, FolderCache};
pub use queue::IngestionQueue;
pub use parking::{ParkedRecord, ParkingLot};
pub use processor::{DocumentProcessor, Outcome};
pub use dispatcher::{Dispatcher, RunSummary};

// Re-export backends for direct use
pub use extraction::backends;
