//! Core types for the `ColdState` engine.
//!
//! This module defines the fundamental types used throughout the library.
//! All types use smart constructors to ensure validity at construction time,
//! following the "parse, don't validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A human-readable identifier for a state repository.
///
/// `RepositoryName` values are guaranteed to be non-empty and at most 128
/// characters. Once constructed, a `RepositoryName` is always valid - no
/// further validation needed. Names show up in log records and in
/// `RepositoryClosed` errors, so features should pick something stable
/// ("network-reachability", "camera-permission").
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct RepositoryName(String);

/// A globally unique identifier for one cold activation cycle, using UUIDv7.
///
/// A fresh `ActivationId` is minted each time a cold repository crosses from
/// zero subscribers to one. Active-family states carry the id of the cycle
/// that created them, which lets consumers (and tests) verify that a resource
/// manager stopped in a previous cycle is never revived in a later one.
///
/// UUIDv7 provides time-based ordering, so activation ids sort in the order
/// the cycles began.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ActivationId(Uuid);

impl ActivationId {
    /// Creates a new `ActivationId` with the current timestamp.
    pub fn new() -> Self {
        // This will always succeed as Uuid::now_v7() always returns a valid v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

/// The revision of the state installed in a repository.
///
/// Revisions start at 0 for the initial (never-published) state and increment
/// monotonically with each published transition. A transition that decides to
/// remain does not bump the revision, which makes "remain is a no-op"
/// observable without requiring states to implement `PartialEq`.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct StateRevision(u64);

impl StateRevision {
    /// Creates the initial revision (0) carried by the constructed state.
    pub fn initial() -> Self {
        Self::try_new(0).expect("0 is always a valid revision")
    }

    /// Returns the next revision after this one.
    #[must_use]
    pub fn next(self) -> Self {
        let current: u64 = self.into();
        Self::try_new(current + 1).expect("next revision should always be valid")
    }
}

/// A timestamp for when a state was published.
///
/// This wrapper ensures consistent timestamp handling throughout the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
