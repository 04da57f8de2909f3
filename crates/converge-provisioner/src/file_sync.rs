//! Content-addressed synchronization of a bucket's file set.
//!
//! [`diff`] compares two fingerprint maps; [`sync`] pushes the difference to
//! a [`BlobStore`] with a bounded pool of concurrent uploads and deletions.

use std::path::{Path, PathBuf};

use converge_core::{FileInfo, FileMap};
use converge_storage::{BlobStore, BoxFuture};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::ProvisionerError;
use crate::progress::StepReporter;

/// Three-way partition of a file set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDiff {
    pub add: FileMap,
    pub update: FileMap,
    pub delete: FileMap,
}

impl FileDiff {
    /// Everything that has to be uploaded.
    pub fn uploads(&self) -> impl Iterator<Item = (&String, &FileInfo)> {
        self.add.iter().chain(self.update.iter())
    }

    /// Units of work, one per upload or deletion.
    pub fn len(&self) -> usize {
        self.add.len() + self.update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compare `current` to `desired`.
///
/// `None` for `current` means nothing exists yet; `None` for `desired` means
/// the whole set is going away.
pub fn diff(current: Option<&FileMap>, desired: Option<&FileMap>) -> FileDiff {
    let empty = FileMap::new();
    let current = current.unwrap_or(&empty);
    let desired = desired.unwrap_or(&empty);

    let mut out = FileDiff::default();
    for (path, want) in desired {
        match current.get(path) {
            None => {
                out.add.insert(path.clone(), want.clone());
            }
            Some(have) if have.hash != want.hash => {
                out.update.insert(path.clone(), want.clone());
            }
            Some(_) => {}
        }
    }
    for (path, have) in current {
        if !desired.contains_key(path) {
            out.delete.insert(path.clone(), have.clone());
        }
    }
    out
}

/// Where upload bodies come from.
pub trait FileSource: Send + Sync {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProvisionerError>>;
}

/// Files under a local directory, addressed by `/`-separated relative path.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSource for DirSource {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProvisionerError>> {
        Box::pin(async move {
            let full = path
                .split('/')
                .fold(self.root.clone(), |acc, part| acc.join(part));
            Ok(tokio::fs::read(&full).await?)
        })
    }
}

/// Fingerprint every regular file below `root`.
pub fn scan_dir(root: &Path) -> Result<FileMap, ProvisionerError> {
    let mut files = FileMap::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => ProvisionerError::Io(io),
            None => ProvisionerError::State(format!("{}: filesystem loop", root.display())),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).map_err(|e| {
            ProvisionerError::State(format!("{}: {e}", entry.path().display()))
        })?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())?;
        files.insert(key, FileInfo::of(&content));
    }
    Ok(files)
}

enum Completed {
    Uploaded(String, FileInfo),
    Deleted(String),
}

/// Upload `diff.add` and `diff.update` and delete `diff.delete`, at most
/// `concurrency` at a time.
///
/// `current` is brought up to date as each unit finishes, so units that
/// completed before a failure stay recorded. The first error stops the
/// remaining work and is returned.
pub async fn sync(
    store: &dyn BlobStore,
    source: &dyn FileSource,
    current: &mut FileMap,
    diff: &FileDiff,
    concurrency: usize,
    cancel: &CancellationToken,
    reporter: &StepReporter,
) -> Result<(), ProvisionerError> {
    if diff.is_empty() {
        return Ok(());
    }
    tracing::info!(
        add = diff.add.len(),
        update = diff.update.len(),
        delete = diff.delete.len(),
        "syncing files"
    );

    let mut units: Vec<BoxFuture<'_, Result<Completed, ProvisionerError>>> =
        Vec::with_capacity(diff.len());
    for (path, _) in diff.uploads() {
        let path = path.clone();
        units.push(Box::pin(async move {
            let body = source.read(&path).await?;
            // Record what was actually sent, not what was planned.
            let info = FileInfo::of(&body);
            store.put(&path, body).await?;
            tracing::debug!(path = %path, "uploaded");
            Ok::<_, ProvisionerError>(Completed::Uploaded(path, info))
        }));
    }
    for path in diff.delete.keys() {
        let path = path.clone();
        units.push(Box::pin(async move {
            store.delete(&path).await?;
            tracing::debug!(path = %path, "deleted");
            Ok::<_, ProvisionerError>(Completed::Deleted(path))
        }));
    }

    let mut results = stream::iter(units).buffer_unordered(concurrency.max(1));

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ProvisionerError::Cancelled),
            next = results.next() => next,
        };
        let Some(result) = next else { break };
        match result? {
            Completed::Uploaded(path, info) => {
                current.insert(path, info);
            }
            Completed::Deleted(path) => {
                current.remove(&path);
            }
        }
        reporter.advance(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use converge_storage::{Blob, MemoryStore, ObjectMeta, StorageError};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn map(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(k, h)| (k.to_string(), FileInfo::new(*h)))
            .collect()
    }

    struct Memory(HashMap<String, Vec<u8>>);

    impl FileSource for Memory {
        fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<u8>, ProvisionerError>> {
            Box::pin(async move {
                self.0.get(path).cloned().ok_or(ProvisionerError::NotFound {
                    kind: "file".into(),
                    name: path.into(),
                })
            })
        }
    }

    fn source(files: &[(&str, &str)]) -> (Memory, FileMap) {
        let contents: HashMap<_, _> = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
            .collect();
        let fingerprints = contents
            .iter()
            .map(|(k, v)| (k.clone(), FileInfo::of(v)))
            .collect();
        (Memory(contents), fingerprints)
    }

    #[test]
    fn diff_partitions_example() {
        let d = diff(
            Some(&map(&[("a.js", "h1")])),
            Some(&map(&[("a.js", "h2"), ("b.js", "h3")])),
        );
        assert_eq!(d.add, map(&[("b.js", "h3")]));
        assert_eq!(d.update, map(&[("a.js", "h2")]));
        assert!(d.delete.is_empty());
    }

    #[test]
    fn diff_of_missing_sides() {
        let files = map(&[("index.html", "x"), ("app.js", "y")]);
        let created = diff(None, Some(&files));
        assert_eq!(created.add, files);
        assert_eq!(created.len(), 2);

        let deleted = diff(Some(&files), None);
        assert_eq!(deleted.delete, files);
        assert!(deleted.add.is_empty() && deleted.update.is_empty());

        assert!(diff(None, None).is_empty());
    }

    fn random_file_map(rng: &mut StdRng) -> FileMap {
        let mut out = FileMap::new();
        for i in 0..12 {
            if rng.gen_bool(0.5) {
                out.insert(format!("f{i}"), FileInfo::new(format!("h{}", rng.gen_range(0..3))));
            }
        }
        out
    }

    #[test]
    fn diff_partitions_every_key_and_converges() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let current = random_file_map(&mut rng);
            let desired = random_file_map(&mut rng);
            let d = diff(Some(&current), Some(&desired));

            let all: std::collections::BTreeSet<_> = current.keys().chain(desired.keys()).collect();
            for key in all {
                let buckets = [
                    d.add.contains_key(key),
                    d.update.contains_key(key),
                    d.delete.contains_key(key),
                ];
                let unchanged = current.get(key).is_some() && current.get(key) == desired.get(key);
                let hits = buckets.iter().filter(|b| **b).count() + usize::from(unchanged);
                assert_eq!(hits, 1, "key {key} in {hits} partitions");
            }

            let mut applied = current.clone();
            for (k, v) in d.uploads() {
                applied.insert(k.clone(), v.clone());
            }
            for k in d.delete.keys() {
                applied.remove(k);
            }
            assert_eq!(applied, desired);
            assert!(diff(Some(&applied), Some(&desired)).is_empty());
        }
    }

    #[tokio::test]
    async fn sync_uploads_deletes_and_tracks_current() {
        let store = MemoryStore::new();
        store.put("old.css", b"stale".to_vec()).await.unwrap();

        let (src, desired) = source(&[("index.html", "<html>"), ("js/app.js", "main()")]);
        let mut current = map(&[("old.css", FileInfo::of(b"stale").hash.as_str())]);
        let d = diff(Some(&current), Some(&desired));

        let reporter = StepReporter::new(None, "site", "bucket", 3);
        reporter.begin_operation(0, 3);
        sync(&store, &src, &mut current, &d, 2, &CancellationToken::new(), &reporter)
            .await
            .unwrap();

        assert_eq!(current, desired);
        assert_eq!(reporter.steps_done(), 3);
        assert_eq!(store.keys(), ["index.html", "js/app.js"]);
        assert_eq!(store.get("js/app.js").await.unwrap().body, b"main()");
    }

    struct FailingPuts {
        inner: MemoryStore,
        fail_on: &'static str,
        puts: AtomicUsize,
    }

    impl BlobStore for FailingPuts {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Blob, StorageError>> {
            self.inner.get(key)
        }

        fn put<'a>(&'a self, key: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<String, StorageError>> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if key == self.fail_on {
                return Box::pin(async move {
                    Err(StorageError::PutObject(format!("{key}: throttled")))
                });
            }
            self.inner.put(key, body)
        }

        fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
            self.inner.delete(key)
        }

        fn conditional_create<'a>(
            &'a self,
            key: &'a str,
            body: Vec<u8>,
        ) -> BoxFuture<'a, Result<String, StorageError>> {
            self.inner.conditional_create(key, body)
        }

        fn conditional_delete<'a>(
            &'a self,
            key: &'a str,
            generation: &'a str,
        ) -> BoxFuture<'a, Result<(), StorageError>> {
            self.inner.conditional_delete(key, generation)
        }

        fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, StorageError>> {
            self.inner.list(prefix)
        }
    }

    #[tokio::test]
    async fn first_error_is_returned_and_completed_work_kept() {
        let store = Arc::new(FailingPuts {
            inner: MemoryStore::new(),
            fail_on: "b",
            puts: AtomicUsize::new(0),
        });
        let (src, desired) = source(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let mut current = FileMap::new();
        let d = diff(None, Some(&desired));

        let err = sync(
            store.as_ref(),
            &src,
            &mut current,
            &d,
            1,
            &CancellationToken::new(),
            &StepReporter::silent(),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("throttled"), "{err}");
        // Width 1 runs units in order: "a" finished, "b" failed, "c" never ran.
        assert_eq!(current, map(&[("a", FileInfo::of(b"1").hash.as_str())]));
        assert_eq!(store.puts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn scan_dir_uses_slash_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets/img")).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("index.html"), b"hi").unwrap();
        std::fs::write(dir.path().join("assets/img/logo.svg"), b"<svg/>").unwrap();

        let files = scan_dir(dir.path()).unwrap();
        assert_eq!(
            files.keys().map(String::as_str).collect::<Vec<_>>(),
            ["assets/img/logo.svg", "index.html"]
        );
        assert_eq!(files["index.html"], FileInfo::of(b"hi"));
        assert!(scan_dir(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn dir_source_reads_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b.txt"), b"body").unwrap();
        let src = DirSource::new(dir.path());
        assert_eq!(src.read("a/b.txt").await.unwrap(), b"body");
    }
}
