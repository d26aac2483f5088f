//! In-process stage doubles for tests across the workspace.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harvd_domain::Document;

use crate::contracts::{EtlContext, ExtractIter, Extractor, Loader, Transformer};
use crate::error::{ExtractorError, LoaderError, TransformerError};

// ── Documents ─────────────────────────────────────────────────────────────────

/// Minimal canonical document wrapping one string record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDocument {
    pub id: String,
    pub body: String,
}

impl Document for TestDocument {
    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "id": self.id, "body": self.body })
    }
}

// ── Extractors ────────────────────────────────────────────────────────────────

/// Extractor yielding a fixed list of records with a fixed version
/// string.
pub struct VecExtractor {
    items: Vec<String>,
    version: Option<String>,
    fail_init: bool,
    report_size: bool,
}

impl VecExtractor {
    pub fn new(items: Vec<String>) -> Self {
        Self {
            items,
            version: Some("v1".to_string()),
            fail_init: false,
            report_size: true,
        }
    }

    pub fn numbered(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("record-{}", i)).collect())
    }

    pub fn with_version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Pretend the source cannot report its size.
    pub fn unknown_size(mut self) -> Self {
        self.report_size = false;
        self
    }
}

impl Extractor for VecExtractor {
    type Item = String;

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), ExtractorError> {
        if self.fail_init {
            return Err(ExtractorError::new("source unreachable"));
        }
        Ok(())
    }

    fn unique_version_string(&self) -> Option<String> {
        self.version.clone()
    }

    fn size(&self) -> Option<u64> {
        self.report_size.then(|| self.items.len() as u64)
    }

    fn extract(&mut self) -> Result<ExtractIter<String>, ExtractorError> {
        Ok(Box::new(self.items.clone().into_iter().map(Ok)))
    }
}

/// Extractor that yields records forever, pausing between items. Used
/// to exercise cooperative abort.
pub struct EndlessExtractor {
    pub delay: Duration,
}

impl EndlessExtractor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Extractor for EndlessExtractor {
    type Item = String;

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), ExtractorError> {
        Ok(())
    }

    fn unique_version_string(&self) -> Option<String> {
        Some("endless".to_string())
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn extract(&mut self) -> Result<ExtractIter<String>, ExtractorError> {
        let delay = self.delay;
        Ok(Box::new((0u64..).map(move |i| {
            std::thread::sleep(delay);
            Ok(format!("record-{}", i))
        })))
    }
}

/// Extractor whose stream fails after a number of good records.
pub struct BrokenStreamExtractor {
    pub good_items: u64,
}

impl Extractor for BrokenStreamExtractor {
    type Item = String;

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), ExtractorError> {
        Ok(())
    }

    fn unique_version_string(&self) -> Option<String> {
        Some("broken".to_string())
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn extract(&mut self) -> Result<ExtractIter<String>, ExtractorError> {
        let good = self.good_items;
        Ok(Box::new((0u64..).map(move |i| {
            if i < good {
                Ok(format!("record-{}", i))
            } else {
                Err(ExtractorError::new("stream interrupted"))
            }
        })))
    }
}

// ── Transformers ──────────────────────────────────────────────────────────────

/// Transformer wrapping each record into a [`TestDocument`] verbatim.
#[derive(Default)]
pub struct IdentityTransformer {
    fail_init: bool,
    fail_on: Option<String>,
}

impl IdentityTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_init() -> Self {
        Self { fail_init: true, fail_on: None }
    }

    /// Fail when a specific record comes through.
    pub fn failing_on(record: &str) -> Self {
        Self { fail_init: false, fail_on: Some(record.to_string()) }
    }
}

impl Transformer for IdentityTransformer {
    type Input = String;
    type Output = TestDocument;

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), TransformerError> {
        if self.fail_init {
            return Err(TransformerError::new("mapping description missing"));
        }
        Ok(())
    }

    fn transform(&mut self, item: String) -> Result<TestDocument, TransformerError> {
        if self.fail_on.as_deref() == Some(item.as_str()) {
            return Err(TransformerError::new(format!("cannot map '{}'", item)));
        }
        Ok(TestDocument { id: item.clone(), body: item })
    }
}

// ── Loaders ───────────────────────────────────────────────────────────────────

/// Loader counting every accepted document, optionally failing after a
/// set number of documents. Shares its counters so tests can observe a
/// loader that was consumed by a pipeline.
pub struct CountingLoader {
    pub loaded: Arc<AtomicU64>,
    pub flushed: Arc<AtomicBool>,
    fail_after: Option<u64>,
}

impl CountingLoader {
    pub fn unbounded() -> Self {
        Self {
            loaded: Arc::new(AtomicU64::new(0)),
            flushed: Arc::new(AtomicBool::new(false)),
            fail_after: None,
        }
    }

    /// Accept `count` documents, then fail.
    pub fn failing_after(count: u64) -> Self {
        Self { fail_after: Some(count), ..Self::unbounded() }
    }

    /// A loader observing shared counters owned by the test.
    pub fn observing(loaded: Arc<AtomicU64>, flushed: Arc<AtomicBool>) -> Self {
        Self { loaded, flushed, fail_after: None }
    }

    pub fn observing_failing_after(
        loaded: Arc<AtomicU64>,
        flushed: Arc<AtomicBool>,
        count: u64,
    ) -> Self {
        Self { loaded, flushed, fail_after: Some(count) }
    }
}

impl Loader for CountingLoader {
    fn init(&mut self, _ctx: &EtlContext) -> Result<(), LoaderError> {
        Ok(())
    }

    fn load(&mut self, _document: &dyn Document) -> Result<(), LoaderError> {
        if let Some(limit) = self.fail_after {
            if self.loaded.load(Ordering::SeqCst) >= limit {
                return Err(LoaderError::new("bulk submission rejected"));
            }
        }
        self.loaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LoaderError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
