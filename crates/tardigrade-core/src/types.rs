//! Core types for Tardigrade

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity key of a person
///
/// Derived from name and date of birth only, so every device computes the
/// same key for the same person. Two records sharing a hash are updates about
/// one person, not copies of one event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordHash(pub String);

impl RecordHash {
    /// Wrap an already computed hash string
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Get the hash as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for display
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for RecordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One check-in
///
/// Records are values: once created they are only copied between stores.
/// An "update" about a person is a newer record with the same hash that wins
/// the merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Person identity key
    pub hash: RecordHash,
    /// Unix seconds; the newer record wins a merge
    pub timestamp: i64,
    /// Latitude at check-in (0.0 when unknown)
    pub latitude: f64,
    /// Longitude at check-in (0.0 when unknown)
    pub longitude: f64,
    /// Medical need category code
    pub medical_need: i64,
    /// Needs shelter
    pub shelter: bool,
    /// Needs water
    pub water: bool,
    /// Household size
    pub people_count: i64,
    /// Free text
    pub notes: String,
    /// Store writes this record has survived
    pub hop_count: u64,
}

impl Record {
    /// Build the originating record for a check-in (hop count 0)
    pub fn check_in(identity: &PersonIdentity, form: &CheckIn, timestamp: i64) -> Self {
        let (latitude, longitude) = form.location.unwrap_or((0.0, 0.0));
        Self {
            hash: identity.record_hash(),
            timestamp,
            latitude,
            longitude,
            medical_need: form.medical_need,
            shelter: form.shelter,
            water: form.water,
            people_count: form.people_count,
            notes: form.notes.clone(),
            hop_count: 0,
        }
    }

    /// Build a check-in record stamped with the current time
    pub fn check_in_now(identity: &PersonIdentity, form: &CheckIn) -> Self {
        Self::check_in(identity, form, chrono::Utc::now().timestamp())
    }

    /// Copy of this record with the hop count bumped by one, pinned at
    /// `u64::MAX` so a peer-supplied count can never wrap back to zero
    pub fn hopped(&self) -> Self {
        Self {
            hop_count: self.hop_count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Equal in everything except hop count
    pub fn same_content(&self, other: &Record) -> bool {
        self.hash == other.hash
            && self.timestamp == other.timestamp
            && self.latitude == other.latitude
            && self.longitude == other.longitude
            && self.medical_need == other.medical_need
            && self.shelter == other.shelter
            && self.water == other.water
            && self.people_count == other.people_count
            && self.notes == other.notes
    }
}

/// Name and date of birth that identify a person across devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIdentity {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
}

impl PersonIdentity {
    pub fn new(
        first_name: impl Into<String>,
        middle_name: impl Into<String>,
        last_name: impl Into<String>,
        date_of_birth: NaiveDate,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            middle_name: middle_name.into(),
            last_name: last_name.into(),
            date_of_birth,
        }
    }

    /// Hex SHA-256 of `"{first} {middle} {last} {YYYY-MM-DD}"`
    ///
    /// An empty middle name still contributes its separator, so the input
    /// always has exactly three spaces between the four parts.
    pub fn record_hash(&self) -> RecordHash {
        let input = format!(
            "{} {} {} {}",
            self.first_name,
            self.middle_name,
            self.last_name,
            self.date_of_birth.format("%Y-%m-%d")
        );
        RecordHash(hex::encode(Sha256::digest(input.as_bytes())))
    }
}

/// Answers captured by the check-in form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub shelter: bool,
    pub water: bool,
    pub people_count: i64,
    pub notes: String,
    pub medical_need: i64,
    /// (latitude, longitude), when the device knows it
    pub location: Option<(f64, f64)>,
}
