//! Built-in directory harvester: extracts JSON record files from a
//! source directory, wraps them as canonical documents, and ships them
//! through a disk loader. Serves as the default ETL when running
//! `harvd serve` standalone; real deployments register their own
//! pipelines through [`harvd_runtime::ServiceSpec`].

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use harvd_domain::Document;
use harvd_etl::{
    EtlContext, ExtractIter, Extractor, ExtractorError, Loader, LoaderError, Transformer,
    TransformerError,
};

// ── Documents ─────────────────────────────────────────────────────────────────

pub struct FileDocument {
    pub id: String,
    pub body: serde_json::Value,
}

impl Document for FileDocument {
    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn to_json(&self) -> serde_json::Value {
        self.body.clone()
    }
}

// ── Extract ───────────────────────────────────────────────────────────────────

/// Yields every `.json` file in a directory, sorted by file name.
pub struct DirectoryExtractor {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl DirectoryExtractor {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, files: Vec::new() }
    }
}

impl Extractor for DirectoryExtractor {
    type Item = (String, serde_json::Value);

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), ExtractorError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            ExtractorError::new(format!("cannot read {}: {}", self.dir.display(), e))
        })?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        self.files = files;
        Ok(())
    }

    fn unique_version_string(&self) -> Option<String> {
        // File count plus newest modification time: changes whenever a
        // record is added, removed or touched.
        let newest = self
            .files
            .iter()
            .filter_map(|path| path.metadata().ok())
            .filter_map(|meta| meta.modified().ok())
            .filter_map(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_millis())
            .max()
            .unwrap_or(0);
        Some(format!("{}:{}", self.files.len(), newest))
    }

    fn size(&self) -> Option<u64> {
        Some(self.files.len() as u64)
    }

    fn extract(&mut self) -> Result<ExtractIter<Self::Item>, ExtractorError> {
        let files = self.files.clone();
        Ok(Box::new(files.into_iter().map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = std::fs::read_to_string(&path).map_err(|e| {
                ExtractorError::new(format!("cannot read {}: {}", path.display(), e))
            })?;
            let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                ExtractorError::new(format!("invalid JSON in {}: {}", path.display(), e))
            })?;
            Ok((stem, value))
        })))
    }
}

// ── Transform ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FileTransformer;

impl Transformer for FileTransformer {
    type Input = (String, serde_json::Value);
    type Output = FileDocument;

    fn init(&mut self, _ctx: &EtlContext) -> Result<(), TransformerError> {
        Ok(())
    }

    fn transform(&mut self, (id, body): Self::Input) -> Result<FileDocument, TransformerError> {
        if !body.is_object() {
            return Err(TransformerError::new(format!(
                "record '{}' is not a JSON object",
                id
            )));
        }
        Ok(FileDocument { id, body })
    }
}

// ── Load ──────────────────────────────────────────────────────────────────────

/// Writes each document as `<id>.json` into the output directory.
pub struct DiskLoader {
    out_dir: PathBuf,
    sequence: u64,
}

impl DiskLoader {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir, sequence: 0 }
    }
}

impl Loader for DiskLoader {
    fn init(&mut self, _ctx: &EtlContext) -> Result<(), LoaderError> {
        std::fs::create_dir_all(&self.out_dir).map_err(|e| {
            LoaderError::new(format!("cannot create {}: {}", self.out_dir.display(), e))
        })
    }

    fn load(&mut self, document: &dyn Document) -> Result<(), LoaderError> {
        let name = match document.id() {
            Some(id) => format!("{}.json", id),
            None => {
                self.sequence += 1;
                format!("document-{}.json", self.sequence)
            }
        };
        let path = self.out_dir.join(name);
        let json = serde_json::to_string_pretty(&document.to_json())
            .map_err(|e| LoaderError::new(format!("cannot serialize document: {}", e)))?;
        std::fs::write(&path, json)
            .map_err(|e| LoaderError::new(format!("cannot write {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvd_config::Configuration;
    use harvd_domain::EtlName;
    use harvd_etl::LoaderRegistry;
    use harvd_events::EventBus;
    use std::sync::Arc;

    fn ctx() -> EtlContext {
        EtlContext {
            name: EtlName::new("Directory").unwrap(),
            config: Arc::new(Configuration::new("test", None, EventBus::new())),
            bus: EventBus::new(),
            loaders: Arc::new(LoaderRegistry::new()),
        }
    }

    #[test]
    fn extractor_reads_sorted_json_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), r#"{"n": 2}"#).unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"n": 1}"#).unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "nope").unwrap();

        let mut extractor = DirectoryExtractor::new(dir.path().to_path_buf());
        extractor.init(&ctx()).unwrap();
        assert_eq!(extractor.size(), Some(2));
        assert!(extractor.unique_version_string().is_some());

        let items: Vec<_> = extractor.extract().unwrap().map(Result::unwrap).collect();
        assert_eq!(items[0].0, "a");
        assert_eq!(items[1].0, "b");
    }

    #[test]
    fn extractor_fails_init_on_missing_directory() {
        let mut extractor = DirectoryExtractor::new(PathBuf::from("/no/such/dir"));
        assert!(extractor.init(&ctx()).is_err());
    }

    #[test]
    fn transformer_rejects_non_objects() {
        let mut transformer = FileTransformer;
        assert!(transformer
            .transform(("x".into(), serde_json::json!({"a": 1})))
            .is_ok());
        assert!(transformer.transform(("x".into(), serde_json::json!([1]))).is_err());
    }

    #[test]
    fn version_string_changes_when_records_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"n": 1}"#).unwrap();

        let mut extractor = DirectoryExtractor::new(dir.path().to_path_buf());
        extractor.init(&ctx()).unwrap();
        let before = extractor.unique_version_string();

        std::fs::write(dir.path().join("b.json"), r#"{"n": 2}"#).unwrap();
        let mut extractor = DirectoryExtractor::new(dir.path().to_path_buf());
        extractor.init(&ctx()).unwrap();
        let after = extractor.unique_version_string();

        assert_ne!(before, after);
    }

    #[test]
    fn disk_loader_names_anonymous_documents_by_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = DiskLoader::new(dir.path().join("out"));
        loader.init(&ctx()).unwrap();
        // A bare JSON value carries no id.
        loader.load(&serde_json::json!({"a": 1})).unwrap();
        loader.load(&serde_json::json!({"a": 2})).unwrap();
        assert!(dir.path().join("out/document-1.json").exists());
        assert!(dir.path().join("out/document-2.json").exists());
    }

    #[test]
    fn disk_loader_writes_documents_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = DiskLoader::new(dir.path().join("out"));
        loader.init(&ctx()).unwrap();
        let document = FileDocument { id: "rec1".into(), body: serde_json::json!({"a": 1}) };
        loader.load(&document).unwrap();
        assert!(dir.path().join("out/rec1.json").exists());
    }
}
