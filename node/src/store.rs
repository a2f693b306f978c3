//! Storage for the feature registry of one Node.
//!
//! Stores are plain CRUD. Reconciliation and write serialization live in the
//! registry, which is the only caller that mutates a store.

use crate::config::StoreType;
use crate::types::{Reconciliation, RegistryData};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

pub trait FeatureStore: Send + Sync {
    fn applications(&self) -> Result<Vec<String>, StoreError>;

    /// Features of `application` by name. Empty when the application is unknown.
    fn features(&self, application: &str) -> Result<BTreeMap<String, bool>, StoreError>;

    fn state(&self, application: &str, feature: &str) -> Result<Option<bool>, StoreError>;

    /// Applies additions and removals for one application in a single write.
    fn apply(&self, application: &str, changes: &Reconciliation) -> Result<(), StoreError>;

    /// Overwrites the state of an existing feature. Returns false if it does not exist.
    fn set_state(&self, application: &str, feature: &str, enabled: bool)
    -> Result<bool, StoreError>;
}

pub fn get_store(store_type: &StoreType) -> Result<Arc<dyn FeatureStore>, StoreError> {
    match store_type {
        StoreType::Memory => Ok(Arc::new(InMemoryFeatureStore::new())),
        StoreType::Filesystem { path, compress } => {
            Ok(Arc::new(FilesystemFeatureStore::open(path, *compress)?))
        }
    }
}

#[derive(Default)]
pub struct InMemoryFeatureStore {
    data: RwLock<RegistryData>,
}

impl InMemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_data(data: RegistryData) -> Self {
        InMemoryFeatureStore {
            data: RwLock::new(data),
        }
    }

    fn snapshot(&self) -> RegistryData {
        self.data.read().clone()
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn applications(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.data.read().applications.keys().cloned().collect())
    }

    fn features(&self, application: &str) -> Result<BTreeMap<String, bool>, StoreError> {
        Ok(self
            .data
            .read()
            .applications
            .get(application)
            .cloned()
            .unwrap_or_default())
    }

    fn state(&self, application: &str, feature: &str) -> Result<Option<bool>, StoreError> {
        Ok(self
            .data
            .read()
            .applications
            .get(application)
            .and_then(|features| features.get(feature))
            .copied())
    }

    fn apply(&self, application: &str, changes: &Reconciliation) -> Result<(), StoreError> {
        let mut write_guard = self.data.write();
        let features = write_guard
            .applications
            .entry(application.to_string())
            .or_default();

        for name in &changes.removed {
            features.remove(name);
        }
        for (name, initial_state) in &changes.added {
            features.insert(name.clone(), *initial_state);
        }

        Ok(())
    }

    fn set_state(
        &self,
        application: &str,
        feature: &str,
        enabled: bool,
    ) -> Result<bool, StoreError> {
        let mut write_guard = self.data.write();
        match write_guard
            .applications
            .get_mut(application)
            .and_then(|features| features.get_mut(feature))
        {
            Some(state) => {
                *state = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Clone, Copy)]
enum Compression {
    None,
    // zstd with compression level
    Zstd(i32),
}

struct Codec {
    compression: Compression,
    config: bincode::config::Configuration,
}

impl Codec {
    fn new(compression: Compression) -> Self {
        Codec {
            compression,
            // standard defaults to little-endian + varint
            config: bincode::config::standard(),
        }
    }

    fn write<W: Write>(&self, writer: &mut W, data: &RegistryData) -> Result<usize, StoreError> {
        match self.compression {
            Compression::None => {
                let size = bincode::serde::encode_into_std_write(data, writer, self.config)?;
                writer.flush()?;
                Ok(size)
            }
            Compression::Zstd(level) => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, level)?;
                let size = bincode::serde::encode_into_std_write(data, &mut encoder, self.config)?;
                encoder.finish()?.flush()?;
                Ok(size)
            }
        }
    }

    fn read<R: Read>(&self, mut reader: R) -> Result<RegistryData, StoreError> {
        match self.compression {
            Compression::None => Ok(bincode::serde::decode_from_std_read(
                &mut reader,
                self.config,
            )?),
            Compression::Zstd(_) => {
                let mut decoder = zstd::stream::read::Decoder::new(reader)?;
                Ok(bincode::serde::decode_from_std_read(
                    &mut decoder,
                    self.config,
                )?)
            }
        }
    }
}

/// Keeps the registry in memory and writes a compressed snapshot to disk after
/// every committed mutation, so a restarted Node keeps its toggled state.
pub struct FilesystemFeatureStore {
    memory: InMemoryFeatureStore,
    path: PathBuf,
    codec: Codec,
}

impl FilesystemFeatureStore {
    /// Loads the snapshot at `path`, or starts empty if there is none yet.
    /// `compress` must match the setting the snapshot was written with.
    pub fn open<P: AsRef<Path>>(path: P, compress: bool) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let codec = Codec::new(match compress {
            true => Compression::Zstd(1),
            false => Compression::None,
        });

        let data = match File::open(&path) {
            Ok(file) => codec.read(io::BufReader::new(file))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No feature snapshot found, starting empty");
                RegistryData::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(FilesystemFeatureStore {
            memory: InMemoryFeatureStore::from_data(data),
            path,
            codec,
        })
    }

    // Callers hold the registry update lock, so snapshots are never written concurrently.
    fn persist(&self) -> Result<(), StoreError> {
        let data = self.memory.snapshot();
        let tmp_path = self.path.with_extension("tmp");

        let file = File::create(&tmp_path)?;
        let mut writer = io::BufWriter::new(file);
        let size = self.codec.write(&mut writer, &data)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), bytes = size, "Stored feature snapshot");
        Ok(())
    }
}

impl FeatureStore for FilesystemFeatureStore {
    fn applications(&self) -> Result<Vec<String>, StoreError> {
        self.memory.applications()
    }

    fn features(&self, application: &str) -> Result<BTreeMap<String, bool>, StoreError> {
        self.memory.features(application)
    }

    fn state(&self, application: &str, feature: &str) -> Result<Option<bool>, StoreError> {
        self.memory.state(application, feature)
    }

    fn apply(&self, application: &str, changes: &Reconciliation) -> Result<(), StoreError> {
        self.memory.apply(application, changes)?;
        self.persist()
    }

    fn set_state(
        &self,
        application: &str,
        feature: &str,
        enabled: bool,
    ) -> Result<bool, StoreError> {
        let updated = self.memory.set_state(application, feature, enabled)?;
        if updated {
            self.persist()?;
        }
        Ok(updated)
    }
}
