use std::sync::Arc;

use harvd_config::Configuration;
use harvd_domain::{Document, EtlName};
use harvd_events::EventBus;

use crate::error::{ExtractorError, LoaderError, TransformerError};
use crate::registry::LoaderRegistry;

/// Everything a stage sees of its owning pipeline during `init`:
/// the pipeline name (also the parameter category), the service
/// configuration, the event bus and the loader registry.
#[derive(Clone)]
pub struct EtlContext {
    pub name: EtlName,
    pub config: Arc<Configuration>,
    pub bus: EventBus,
    pub loaders: Arc<LoaderRegistry>,
}

/// A pull-based stream of extracted records. Items are produced
/// lazily; an `Err` item ends the harvest with extraction health.
pub type ExtractIter<E> = Box<dyn Iterator<Item = Result<E, ExtractorError>> + Send>;

/// The Extract stage: connects to a source repository and yields raw
/// records one at a time.
///
/// Extractors are recreated by the pipeline on every `update()`, so
/// implementations may cache connection state freely.
pub trait Extractor: Send {
    type Item: Send + 'static;

    fn init(&mut self, ctx: &EtlContext) -> Result<(), ExtractorError>;

    /// Opaque token summarizing the source state (e.g. a repository
    /// timestamp). Hashed by the pipeline to detect unchanged sources.
    /// `None` when the source cannot report a version.
    fn unique_version_string(&self) -> Option<String>;

    /// Total number of extractable records, when the source reports it.
    fn size(&self) -> Option<u64>;

    /// Open the record stream. Called once per harvest, after `init`.
    fn extract(&mut self) -> Result<ExtractIter<Self::Item>, ExtractorError>;

    /// Release source connections and buffers.
    fn clear(&mut self) {}
}

/// The Transform stage: turns one extracted record into a canonical
/// document.
pub trait Transformer: Send {
    type Input: Send + 'static;
    type Output: Document + 'static;

    fn init(&mut self, ctx: &EtlContext) -> Result<(), TransformerError>;

    fn transform(&mut self, item: Self::Input) -> Result<Self::Output, TransformerError>;

    fn clear(&mut self) {}
}

/// The Load stage: hands canonical documents to a downstream sink
/// (search index, disk, ...). Implementations live outside the core;
/// they are selected per harvest through the loader registry.
pub trait Loader: Send {
    fn init(&mut self, ctx: &EtlContext) -> Result<(), LoaderError>;

    fn load(&mut self, document: &dyn Document) -> Result<(), LoaderError>;

    /// Flush buffered documents to the sink. Invoked at the end of a
    /// harvest and by the submit command. The default assumes an
    /// unbuffered loader.
    fn flush(&mut self) -> Result<(), LoaderError> {
        Ok(())
    }

    /// Release sink connections and buffers.
    fn clear(&mut self) {}
}
