//! Deterministic identity allocation.
//!
//! The system under test compares instance and replica-set UUIDs with `<`,
//! not just `==`, and some of its code paths depend on the result. Tests
//! therefore need identities whose ordering is reproducible: the allocator
//! hands out UUID-shaped tokens from a single counter, so byte order matches
//! allocation order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fixed prefix of every allocated identity.
pub const IDENTITY_PREFIX: &str = "aaaaaaaa-aaaa-aaaa-aaaa-";

/// Hex digits in the sequence part. Sequence numbers above `16^12 - 1` would
/// widen the token and break ordering.
const SEQUENCE_WIDTH: usize = 12;

/// A UUID-shaped identifier whose lexical order equals allocation order.
///
/// # Examples
///
/// ```
/// use shardlab_core::identity::Identity;
///
/// let id = Identity::from_sequence(26);
/// assert_eq!(id.as_str(), "aaaaaaaa-aaaa-aaaa-aaaa-00000000001a");
/// assert_eq!(id.sequence(), Some(26));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates the identity for a sequence number.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!(
            "{IDENTITY_PREFIX}{sequence:0width$x}",
            width = SEQUENCE_WIDTH
        ))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the sequence number if this identity was produced by an
    /// allocator.
    pub fn sequence(&self) -> Option<u64> {
        let hex = self.0.strip_prefix(IDENTITY_PREFIX)?;
        u64::from_str_radix(hex, 16).ok()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Allocates identities by logical name.
///
/// The first request for a name takes the next value of the counter; later
/// requests for the same name return the memoized identity. Allocation takes
/// `&mut self`, so concurrent use has to go through the owner. Construct a
/// fresh allocator per scenario to restart the stream.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    next: u64,
    by_name: HashMap<String, Identity>,
}

impl IdentityAllocator {
    /// Creates an allocator starting at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an allocator whose first identity has the given sequence.
    pub fn starting_at(sequence: u64) -> Self {
        Self {
            next: sequence,
            by_name: HashMap::new(),
        }
    }

    /// Returns the identity for `name`, allocating one on first use.
    pub fn allocate(&mut self, name: &str) -> Identity {
        if let Some(identity) = self.by_name.get(name) {
            return identity.clone();
        }

        let identity = Identity::from_sequence(self.next);
        self.next += 1;
        tracing::trace!(name, identity = %identity, "allocated identity");
        self.by_name.insert(name.to_string(), identity.clone());
        identity
    }

    /// Returns the identity previously allocated for `name`.
    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.by_name.get(name)
    }

    /// Returns the number of names allocated so far.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if nothing has been allocated.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
