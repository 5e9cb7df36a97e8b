mod version;

pub use version::{select_latest, sort_descending};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::FileRecord;

/// On-disk package index. Artifacts live at
/// `root/{name}/{version}/{filename}` with a `{filename}.json` sidecar
/// holding the upload metadata. Published files are immutable.
pub struct PackageIndex {
    root: PathBuf,
    publish_lock: Mutex<()>,
}

impl PackageIndex {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("index"),
            publish_lock: Mutex::new(()),
        }
    }

    fn project_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    fn artifact_path(&self, name: &str, version: &str, filename: &str) -> PathBuf {
        self.version_dir(name, version).join(filename)
    }

    fn sidecar_path(&self, name: &str, version: &str, filename: &str) -> PathBuf {
        self.version_dir(name, version).join(format!("{filename}.json"))
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join("tmp").join(Uuid::new_v4().to_string())
    }

    /// Local project names, sorted. An index that has never seen an
    /// upload lists as empty.
    pub async fn list_projects(&self) -> Result<Vec<String>> {
        let mut names = match dir_names(&self.root).await {
            Ok(names) => names,
            Err(Error::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        names.retain(|n| n != "tmp");
        names.sort();
        Ok(names)
    }

    pub fn project_exists(&self, name: &str) -> bool {
        validate_component(name).is_ok() && self.project_dir(name).is_dir()
    }

    /// Versions of a project ordered descending by precedence.
    /// Directories with unparseable names are left out of the listing.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        validate_component(name)?;
        let names = dir_names(&self.project_dir(name)).await?;
        Ok(sort_descending(names))
    }

    /// Resolves a version request: an explicit version must exist as a
    /// directory (exact match, even for unparseable names); a bare
    /// request selects the latest.
    pub async fn resolve(&self, name: &str, requested: Option<&str>) -> Result<String> {
        validate_component(name)?;

        if let Some(v) = requested {
            validate_component(v)?;
            if self.version_dir(name, v).is_dir() {
                return Ok(v.to_string());
            }
            return Err(Error::NotFound);
        }

        let names = dir_names(&self.project_dir(name)).await?;
        select_latest(&names).ok_or(Error::NotFound)
    }

    /// File records for one version, read from the sidecars. Artifacts
    /// without a sidecar and sidecars that fail to parse are skipped.
    pub async fn files(&self, name: &str, version: &str) -> Result<Vec<FileRecord>> {
        validate_component(name)?;
        validate_component(version)?;

        let dir = self.version_dir(name, version);
        let mut entries = fs::read_dir(&dir).await.map_err(from_io)?;
        let mut records = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(".json") {
                continue;
            }
            match read_sidecar(&entry.path()).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable sidecar {}: {}", file_name, e);
                }
            }
        }

        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    /// File records across every listed version, latest version first.
    pub async fn all_files(&self, name: &str) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        for version in self.list_versions(name).await? {
            records.extend(self.files(name, &version).await?);
        }
        Ok(records)
    }

    /// The sidecar for one published file.
    pub async fn file_record(
        &self,
        name: &str,
        version: &str,
        filename: &str,
    ) -> Result<FileRecord> {
        validate_component(name)?;
        validate_component(version)?;
        validate_component(filename)?;
        read_sidecar(&self.sidecar_path(name, version, filename)).await
    }

    /// Raw artifact bytes.
    pub async fn read_file(&self, name: &str, version: &str, filename: &str) -> Result<Vec<u8>> {
        validate_component(name)?;
        validate_component(version)?;
        validate_component(filename)?;
        fs::read(self.artifact_path(name, version, filename))
            .await
            .map_err(from_io)
    }

    /// Stores one uploaded file and its metadata sidecar. Declared
    /// digests are checked against the received bytes before anything
    /// touches disk. A `(name, version, filename)` triple that already
    /// exists is a conflict; an artifact left behind without its
    /// sidecar by an interrupted upload may be written over.
    pub async fn publish(&self, record: &FileRecord, data: &[u8]) -> Result<()> {
        validate_component(&record.name)?;
        validate_component(&record.version)?;
        validate_component(&record.filename)?;
        if record.filename.ends_with(".json") {
            return Err(Error::Validation(
                "filename must not end in .json".to_string(),
            ));
        }

        verify_digests(record, data)?;

        let artifact = self.artifact_path(&record.name, &record.version, &record.filename);
        let sidecar = self.sidecar_path(&record.name, &record.version, &record.filename);

        let _guard = self.publish_lock.lock().await;

        if artifact.exists() && sidecar.exists() {
            return Err(Error::Conflict(format!(
                "file {} already exists for {} {}",
                record.filename, record.name, record.version
            )));
        }

        self.write_atomic(&artifact, data).await?;
        let json = serde_json::to_vec_pretty(record)?;
        self.write_atomic(&sidecar, &json).await?;

        Ok(())
    }

    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp = self.temp_path();
        if let Some(parent) = temp.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(&temp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&temp, path).await?;

        Ok(())
    }
}

async fn read_sidecar(path: &Path) -> Result<FileRecord> {
    let bytes = fs::read(path).await.map_err(from_io)?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn dir_names(path: &Path) -> Result<Vec<String>> {
    let mut entries = fs::read_dir(path).await.map_err(from_io)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn from_io(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound
    } else {
        Error::Io(e)
    }
}

fn validate_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0')
    {
        return Err(Error::Validation(format!(
            "invalid path component '{component}'"
        )));
    }
    Ok(())
}

fn verify_digests(record: &FileRecord, data: &[u8]) -> Result<()> {
    if let Some(expected) = &record.md5_digest {
        let actual = hex::encode(Md5::digest(data));
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(Error::Validation(format!(
                "md5 digest mismatch: declared {expected}, got {actual}"
            )));
        }
    }
    if let Some(expected) = &record.sha256_digest {
        let actual = hex::encode(Sha256::digest(data));
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(Error::Validation(format!(
                "sha256 digest mismatch: declared {expected}, got {actual}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::TempDir;

    use super::*;

    fn record(name: &str, version: &str, filename: &str) -> FileRecord {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "version": version,
            "filename": filename,
            "upload_time": Utc::now().to_rfc3339(),
        }))
        .unwrap()
    }

    fn setup() -> (TempDir, PackageIndex) {
        let dir = TempDir::new().unwrap();
        let index = PackageIndex::new(dir.path());
        (dir, index)
    }

    #[tokio::test]
    async fn test_publish_and_read_back() {
        let (_dir, index) = setup();
        let rec = record("demo", "1.0", "demo-1.0.tar.gz");

        index.publish(&rec, b"artifact-bytes").await.unwrap();

        assert!(index.project_exists("demo"));
        assert_eq!(index.list_projects().await.unwrap(), vec!["demo"]);
        assert_eq!(index.list_versions("demo").await.unwrap(), vec!["1.0"]);

        let files = index.files("demo", "1.0").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "demo-1.0.tar.gz");

        let bytes = index.read_file("demo", "1.0", "demo-1.0.tar.gz").await.unwrap();
        assert_eq!(bytes, b"artifact-bytes");

        let stored = index
            .file_record("demo", "1.0", "demo-1.0.tar.gz")
            .await
            .unwrap();
        assert_eq!(stored.version, "1.0");
    }

    #[tokio::test]
    async fn test_duplicate_publish_conflicts() {
        let (_dir, index) = setup();
        let rec = record("demo", "1.0", "demo-1.0.tar.gz");

        index.publish(&rec, b"one").await.unwrap();
        let result = index.publish(&rec, b"two").await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // The original bytes survive the rejected second upload.
        let bytes = index.read_file("demo", "1.0", "demo-1.0.tar.gz").await.unwrap();
        assert_eq!(bytes, b"one");
    }

    #[tokio::test]
    async fn test_orphaned_artifact_may_be_overwritten() {
        let (_dir, index) = setup();
        let rec = record("demo", "1.0", "demo-1.0.tar.gz");
        index.publish(&rec, b"one").await.unwrap();

        // Simulate an interrupted upload that wrote the artifact but
        // not the sidecar.
        fs::remove_file(index.sidecar_path("demo", "1.0", "demo-1.0.tar.gz"))
            .await
            .unwrap();

        index.publish(&rec, b"two").await.unwrap();
        let bytes = index.read_file("demo", "1.0", "demo-1.0.tar.gz").await.unwrap();
        assert_eq!(bytes, b"two");
    }

    #[tokio::test]
    async fn test_digest_verification() {
        let (_dir, index) = setup();

        let mut rec = record("demo", "1.0", "demo-1.0.tar.gz");
        rec.sha256_digest = Some(hex::encode(Sha256::digest(b"payload")));
        rec.md5_digest = Some(hex::encode(Md5::digest(b"payload")));
        index.publish(&rec, b"payload").await.unwrap();

        let mut bad = record("demo", "2.0", "demo-2.0.tar.gz");
        bad.sha256_digest = Some("00".repeat(32));
        let result = index.publish(&bad, b"payload").await;
        assert!(matches!(result, Err(Error::Validation(_))));
        // Nothing was written for the rejected upload.
        assert!(index.read_file("demo", "2.0", "demo-2.0.tar.gz").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_exact_and_latest() {
        let (_dir, index) = setup();
        for version in ["1.0", "1.0.1", "2.0a1"] {
            let filename = format!("demo-{version}.tar.gz");
            index
                .publish(&record("demo", version, &filename), b"x")
                .await
                .unwrap();
        }

        assert_eq!(index.resolve("demo", None).await.unwrap(), "1.0.1");
        assert_eq!(index.resolve("demo", Some("2.0a1")).await.unwrap(), "2.0a1");
        assert!(matches!(
            index.resolve("demo", Some("3.0")).await,
            Err(Error::NotFound)
        ));
        assert!(matches!(
            index.resolve("ghost", None).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_versions_sorted_descending() {
        let (_dir, index) = setup();
        for version in ["1.0", "2.0a1", "1.0.1"] {
            let filename = format!("demo-{version}.tar.gz");
            index
                .publish(&record("demo", version, &filename), b"x")
                .await
                .unwrap();
        }

        assert_eq!(
            index.list_versions("demo").await.unwrap(),
            vec!["2.0a1", "1.0.1", "1.0"]
        );
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let (_dir, index) = setup();
        assert!(matches!(
            index.list_versions("ghost").await,
            Err(Error::NotFound)
        ));
        assert!(matches!(index.files("ghost", "1.0").await, Err(Error::NotFound)));
        assert!(!index.project_exists("ghost"));
    }

    #[tokio::test]
    async fn test_path_components_validated() {
        let (_dir, index) = setup();
        assert!(matches!(
            index.read_file("..", "1.0", "f").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            index.read_file("demo", "1.0/..", "f").await,
            Err(Error::Validation(_))
        ));

        let rec = record("demo", "1.0", "evil/../../f");
        assert!(matches!(
            index.publish(&rec, b"x").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_skipped() {
        let (_dir, index) = setup();
        index
            .publish(&record("demo", "1.0", "demo-1.0.tar.gz"), b"x")
            .await
            .unwrap();

        fs::write(
            index.sidecar_path("demo", "1.0", "broken.whl"),
            b"not json",
        )
        .await
        .unwrap();

        let files = index.files("demo", "1.0").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "demo-1.0.tar.gz");
    }

    #[tokio::test]
    async fn test_all_files_spans_versions() {
        let (_dir, index) = setup();
        index
            .publish(&record("demo", "1.0", "demo-1.0.tar.gz"), b"x")
            .await
            .unwrap();
        index
            .publish(&record("demo", "1.1", "demo-1.1.tar.gz"), b"x")
            .await
            .unwrap();
        index
            .publish(&record("demo", "1.1", "demo-1.1-py3-none-any.whl"), b"x")
            .await
            .unwrap();

        let files = index.all_files("demo").await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "demo-1.1-py3-none-any.whl",
                "demo-1.1.tar.gz",
                "demo-1.0.tar.gz"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_index_lists_no_projects() {
        let (_dir, index) = setup();
        assert!(index.list_projects().await.unwrap().is_empty());
    }
}
