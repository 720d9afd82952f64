use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::PathBuf,
};

use thermonode_common::ParameterBackend;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Parameter document stored as a single JSON file. Writes go to a sibling
/// temporary file that is renamed over the target, so readers only ever see
/// the previous or the new document.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "params.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_atomically(&self, document: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        let result = (|| {
            let mut file = fs::File::create(&temp)?;
            file.write_all(document)?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}

impl ParameterBackend for FileBackend {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// On a multi-threaded runtime the fsync runs under `block_in_place` so
    /// the worker's other tasks move elsewhere while it blocks.
    fn write(&self, document: &[u8]) -> io::Result<()> {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.write_atomically(document))
            }
            _ => self.write_atomically(document),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use thermonode_common::{Mode, ParameterStore, Parameters, RelayState};

    use super::*;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("params.json"));

        assert!(backend.read().unwrap().is_none());
    }

    #[test]
    fn write_replaces_document_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("params.json"));

        backend.write(b"first").unwrap();
        backend.write(b"second").unwrap();

        assert_eq!(backend.read().unwrap(), Some(b"second".to_vec()));
        assert!(!dir.path().join("nested").join("params.json.tmp").exists());
    }

    #[test]
    fn failed_write_keeps_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let backend = FileBackend::new(&path);
        backend.write(b"{\"valid\": true}").unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(dir.path().join("params.json.tmp")).unwrap();
        assert!(backend.write(b"broken").is_err());

        assert_eq!(fs::read(&path).unwrap(), b"{\"valid\": true}".to_vec());
    }

    #[test]
    fn store_survives_restart_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let store = ParameterStore::load(Box::new(FileBackend::new(&path)), Parameters::default());
        store
            .update(|p| {
                p.mode = Mode::Manual;
                p.relay = RelayState::On;
            })
            .unwrap();
        drop(store);

        let reloaded =
            ParameterStore::load(Box::new(FileBackend::new(&path)), Parameters::default());
        assert_eq!(reloaded.snapshot().mode, Mode::Manual);
        assert_eq!(reloaded.snapshot().relay, RelayState::On);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_from_multi_thread_runtime_tasks_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        let store = Arc::new(ParameterStore::load(
            Box::new(FileBackend::new(&path)),
            Parameters::default(),
        ));

        let writer = tokio::spawn({
            let store = store.clone();
            async move {
                for period in 1..=20 {
                    store.update(|p| p.period = period).unwrap();
                }
            }
        });
        let ticker = tokio::spawn(async {
            for _ in 0..5 {
                tokio::task::yield_now().await;
            }
        });

        writer.await.unwrap();
        ticker.await.unwrap();
        let stored: Parameters = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.period, 20);
    }

    #[tokio::test]
    async fn writes_on_a_current_thread_runtime_run_inline() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("params.json"));

        backend.write(b"inline").unwrap();

        assert_eq!(backend.read().unwrap(), Some(b"inline".to_vec()));
    }

    #[test]
    fn corrupt_file_is_rewritten_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, b"\x00\x01garbage").unwrap();

        let store = ParameterStore::load(Box::new(FileBackend::new(&path)), Parameters::default());

        assert_eq!(store.snapshot(), Parameters::default());
        let raw = fs::read(&path).unwrap();
        let stored: Parameters = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored, Parameters::default());
    }
}
