//! The per-device record store.
//!
//! One file holds every record this device knows about. The file is always
//! read and rewritten whole, and every read-modify-write runs under one
//! store-wide lock, so a concurrent add and merge cannot lose each other's
//! updates.
//!
//! Record stores are created explicitly and shared as `Arc<RecordStore>`;
//! there is no process-global instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::codec::{CsvCodec, RecordCodec};
use crate::config::{HopPolicy, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::types::Record;

mod file;
mod merge;

pub use merge::{reconcile, MergeReport, Origin, Reconciled, TieBreak, TIE_BREAK};

/// Proof that the caller holds the store lock
type Locked<'a> = MutexGuard<'a, ()>;

/// Durable record set for this device
pub struct RecordStore {
    path: PathBuf,
    hop_policy: HopPolicy,
    codec: Arc<dyn RecordCodec>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("path", &self.path)
            .field("hop_policy", &self.hop_policy)
            .finish()
    }
}

impl RecordStore {
    /// Open the store described by `config` using the CSV codec.
    ///
    /// Creates the data directory if needed. The store file itself is created
    /// on the first write.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        Self::with_codec(config, Arc::new(CsvCodec))
    }

    /// Open a store with a custom row codec
    pub fn with_codec(config: &StoreConfig, codec: Arc<dyn RecordCodec>) -> StoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.store_path();
        debug!(path = %path.display(), hop_policy = ?config.hop_policy, "Opened record store");

        Ok(Self {
            path,
            hop_policy: config.hop_policy,
            codec,
            lock: Mutex::new(()),
        })
    }

    /// Location of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn hop_policy(&self) -> HopPolicy {
        self.hop_policy
    }

    /// Append one new record and rewrite the store.
    ///
    /// If the person already has a record, the newer of the two takes its
    /// slot (the added record wins a tie), so the store never holds two
    /// records for one hash.
    pub fn add(&self, record: Record) -> StoreResult<()> {
        let guard = self.lock.lock();
        let existing = self.load(&guard)?;

        let hash = record.hash.clone();
        let mut tagged: Vec<(Record, Origin)> =
            existing.into_iter().map(|r| (r, Origin::Local)).collect();

        match tagged.iter().position(|(r, _)| r.hash == record.hash) {
            Some(i) if tagged[i].0.timestamp > record.timestamp => {
                debug!(%hash, "Stored record is newer than added record, keeping it");
            }
            Some(i) => tagged[i] = (record, Origin::Local),
            None => tagged.push((record, Origin::Local)),
        }

        self.write(&guard, &tagged)?;
        info!(hash = %hash, total = tagged.len(), "Added record");
        Ok(())
    }

    /// Run [`add`](Self::add) on the blocking pool without waiting for it.
    ///
    /// The returned handle can be dropped for fire-and-forget use, or awaited
    /// (see [`join`]) to observe a write failure.
    pub fn add_in_background(self: &Arc<Self>, record: Record) -> JoinHandle<StoreResult<()>> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.add(record))
    }

    /// All records in file order; empty when the file is missing or empty
    pub fn list(&self) -> StoreResult<Vec<Record>> {
        let guard = self.lock.lock();
        self.load(&guard)
    }

    /// Reconcile a peer's serialized table into this store.
    ///
    /// The incoming bytes are fully decoded before anything is written; on
    /// any error the store file is left exactly as it was.
    pub fn merge(&self, raw: &[u8]) -> StoreResult<MergeReport> {
        let guard = self.lock.lock();

        let ours = self.load(&guard)?;
        let theirs = self.codec.decode_file(raw)?;

        let Reconciled { records, report } = reconcile(ours, theirs);
        self.write(&guard, &records)?;

        info!(
            received = report.received,
            added = report.added,
            replaced = report.replaced,
            kept_local = report.kept_local,
            total = report.total,
            "Merged peer records"
        );
        Ok(report)
    }

    /// Run [`merge`](Self::merge) on the blocking pool
    pub fn merge_in_background(
        self: &Arc<Self>,
        raw: Bytes,
    ) -> JoinHandle<StoreResult<MergeReport>> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.merge(&raw))
    }

    /// Snapshot of the persisted bytes, for sending to a peer
    pub fn current_file_bytes(&self) -> StoreResult<Bytes> {
        let _guard = self.lock.lock();
        Ok(Bytes::from(file::read_all(&self.path)?))
    }

    fn load(&self, _locked: &Locked<'_>) -> StoreResult<Vec<Record>> {
        let bytes = file::read_all(&self.path)?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.codec.decode_file(&bytes)?)
    }

    fn write(&self, _locked: &Locked<'_>, records: &[(Record, Origin)]) -> StoreResult<()> {
        let bumped: Vec<Record> = records
            .iter()
            .map(|(record, origin)| match (self.hop_policy, origin) {
                (HopPolicy::EveryWrite, _) | (HopPolicy::PeerTransfer, Origin::Peer) => {
                    record.hopped()
                }
                (HopPolicy::PeerTransfer, Origin::Local) => record.clone(),
            })
            .collect();

        file::replace(&self.path, &self.codec.encode_file(&bumped))
    }
}

/// Await a background store task, folding a panic or cancellation into
/// [`StoreError::Join`]
pub async fn join<T>(handle: JoinHandle<StoreResult<T>>) -> StoreResult<T> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Join(e.to_string())),
    }
}
