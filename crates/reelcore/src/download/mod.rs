//! The download pipeline: catalog lookup, transfer, transcode, delivery.

pub mod catalog;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod transcode;
pub mod transfer;
pub mod worker;

pub use catalog::{Catalog, FormatCatalog, FormatDescriptor, StreamKind, StreamLookup, YtDlpLookup};
pub use error::{CatalogError, DeliveryError, PipelineError, SelectionError, TranscodeError, TransferError, WorkerError};
pub use pipeline::{Orchestrator, PipelineParts, RequestOutcome, Selection, SelectionToken};
pub use progress::{ProgressFn, ProgressThrottle, ProgressUpdate};
pub use transcode::{FfmpegTranscoder, TranscodeJob, TranscodePlan, Transcoder};
pub use transfer::{HttpTransfer, TransferEngine};
pub use worker::WorkerPool;
