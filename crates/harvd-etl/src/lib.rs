pub mod contracts;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod snapshot;
pub mod test_support;

pub use contracts::{EtlContext, ExtractIter, Extractor, Loader, Transformer};
pub use error::{EtlError, ExtractorError, LoaderError, TransformerError};
pub use manager::EtlManager;
pub use pipeline::{Etl, EtlPipeline, HarvestOutcome, PrepareOutcome};
pub use registry::LoaderRegistry;
pub use snapshot::EtlSnapshot;
