//! Tardigrade Core Library
//!
//! Offline check-in records for disaster relief, spread device to device.
//!
//! ## Overview
//!
//! People check in on whatever device is nearby: name, date of birth and what
//! they need. Each device keeps every check-in it has ever seen in one local
//! file. When two devices come into range they swap their files and merge
//! them, so records travel across a disaster area without any network.
//!
//! ## Core Principles
//!
//! - **Content-addressed**: a record's hash is derived from the person's
//!   name and date of birth, so every device agrees on who a record is about
//! - **Last writer wins**: for one person, the newest check-in survives a merge
//! - **Whole-file exchange**: peers ship their complete store, chunked to fit
//!   small radio packets
//!
//! ## Quick Start
//!
//! ```ignore
//! use tardigrade_core::{CheckIn, PersonIdentity, Record, RecordStore, StoreConfig};
//!
//! let store = RecordStore::open(&StoreConfig::new("~/.tardigrade/data"))?;
//!
//! let person = PersonIdentity::new("Ada", "M", "Lovelace", dob);
//! let form = CheckIn { water: true, people_count: 3, ..Default::default() };
//! store.add(Record::check_in_now(&person, &form))?;
//!
//! let report = store.merge(&bytes_from_peer)?;
//! println!("{} new, {} updated", report.added, report.replaced);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod store;
pub mod sync;
pub mod types;

// Re-exports
pub use codec::{CsvCodec, RecordCodec};
pub use config::{DiscoveryConfig, HopPolicy, SessionConfig, StoreConfig};
pub use error::{
    CodecError, ProtocolError, StoreError, StoreResult, SyncError, SyncResult,
};
pub use store::{MergeReport, RecordStore};
pub use sync::{LinkEvent, PeerLink, SessionStatus, SyncEvent, SyncSession};
pub use types::*;
