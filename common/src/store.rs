use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use thiserror::Error;
use tracing::{info, warn};

use crate::types::Parameters;

/// Durable home of the parameter document.
pub trait ParameterBackend: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the stored document. A failed write must leave the previous
    /// document readable.
    fn write(&self, document: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("parameter storage i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode parameters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("rejected parameters: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Update {
    pub params: Parameters,
    pub changed: bool,
    pub persisted: bool,
}

/// Owner of the operating parameters. Readers take copies; writers go through
/// [`ParameterStore::update`], which swaps in a complete new value and then
/// rewrites the whole document.
pub struct ParameterStore {
    backend: Box<dyn ParameterBackend>,
    current: RwLock<Parameters>,
    // Serializes writers and remembers whether the last persist failed.
    dirty: Mutex<bool>,
}

impl ParameterStore {
    /// Reads the stored document. Missing or unparseable documents are
    /// replaced with `defaults`, which are written back immediately.
    pub fn load(backend: Box<dyn ParameterBackend>, defaults: Parameters) -> Self {
        let loaded = match backend.read() {
            Ok(Some(raw)) => match decode(&raw) {
                Ok(params) => Some(params),
                Err(err) => {
                    warn!("stored parameters unusable, restoring defaults: {err}");
                    None
                }
            },
            Ok(None) => {
                info!("no stored parameters, writing defaults");
                None
            }
            Err(err) => {
                warn!("failed to read stored parameters, restoring defaults: {err}");
                None
            }
        };

        let repaired = loaded.is_none();
        let store = Self {
            backend,
            current: RwLock::new(loaded.unwrap_or(defaults)),
            dirty: Mutex::new(repaired),
        };

        if repaired {
            if let Err(err) = store.persist() {
                warn!("failed to write default parameters: {err}");
            }
        }
        store
    }

    pub fn snapshot(&self) -> Parameters {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `mutator` to a copy of the current parameters and commits it if
    /// the result is valid. Persistence failures are logged and leave the
    /// in-memory value authoritative; the next update retries the write.
    pub fn update<F>(&self, mutator: F) -> Result<Update, StoreError>
    where
        F: FnOnce(&mut Parameters),
    {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.snapshot();
        let mut next = previous;
        mutator(&mut next);
        next.validate().map_err(StoreError::Invalid)?;

        let changed = next != previous;
        if changed {
            *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
        }

        let mut persisted = false;
        if changed || *dirty {
            match self.write_document(&next) {
                Ok(()) => {
                    *dirty = false;
                    persisted = true;
                }
                Err(err) => {
                    *dirty = true;
                    warn!("failed to persist parameters: {err}");
                }
            }
        }

        Ok(Update {
            params: next,
            changed,
            persisted,
        })
    }

    /// Writes the current parameters regardless of the dirty state.
    pub fn persist(&self) -> Result<(), StoreError> {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.write_document(&self.snapshot());
        *dirty = result.is_err();
        result
    }

    pub fn is_dirty(&self) -> bool {
        *self.dirty.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_document(&self, params: &Parameters) -> Result<(), StoreError> {
        let document = serde_json::to_vec_pretty(params)?;
        self.backend.write(&document)?;
        Ok(())
    }
}

fn decode(raw: &[u8]) -> Result<Parameters, StoreError> {
    let params: Parameters = serde_json::from_slice(raw)?;
    params.validate().map_err(StoreError::Invalid)?;
    Ok(params)
}

/// In-memory backend for tests and diskless targets.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    document: Arc<Mutex<Option<Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: impl Into<Vec<u8>>) -> Self {
        let backend = Self::default();
        *backend.lock() = Some(document.into());
        backend
    }

    pub fn document(&self) -> Option<Vec<u8>> {
        self.lock().clone()
    }

    pub fn stored_parameters(&self) -> Option<Parameters> {
        self.document()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ParameterBackend for MemoryBackend {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.document())
    }

    fn write(&self, document: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::other("simulated write failure"));
        }
        *self.lock() = Some(document.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
