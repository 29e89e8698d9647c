//! The persistence protocol adapter: the narrow slice of the object-store
//! client ("Objecter", spec §1/§6) this crate consumes.
//!
//! The real Objecter is an external collaborator — an asynchronous client
//! library shared across the whole rank. This module only declares the
//! operations [`crate::session_map::SessionMap`] needs from it and a
//! [`CompoundWrite`] builder for composing them into one atomic mutation,
//! matching spec §6's "composable into one atomic mutation" operations.

pub mod fake;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::error::StoreError;

/// One page of an ordered OMAP key range read (spec §6: `omap_get_vals`).
#[derive(Debug, Clone, Default)]
pub struct OmapPage {
    /// `(key, value)` pairs in lexicographic key order.
    pub entries: Vec<(String, Vec<u8>)>,
}

/// A single atomic object mutation, composed from zero or more of the
/// write primitives spec §6 lists. All fields apply in the order listed
/// here, matching spec §4.5 step 3: header, then (optional) truncate,
/// then `omap_set`, then `omap_rm_keys`.
#[derive(Debug, Clone, Default)]
pub struct CompoundWrite {
    pub omap_set_header: Option<Vec<u8>>,
    /// Present only when upgrading out of the legacy byte-payload format.
    pub truncate_to_zero: bool,
    pub omap_set: BTreeMap<String, Vec<u8>>,
    pub omap_rm_keys: BTreeSet<String>,
}

impl CompoundWrite {
    pub fn is_empty(&self) -> bool {
        self.omap_set_header.is_none()
            && !self.truncate_to_zero
            && self.omap_set.is_empty()
            && self.omap_rm_keys.is_empty()
    }
}

/// The object-store operations the session map consumes (spec §6), as an
/// async trait so [`crate::session_map::SessionMap`] can await a completion
/// and re-enter its own serialized context, mirroring how a completion
/// dispatcher ("Finisher") hands control back in the real system.
#[async_trait]
pub trait Objecter: Send + Sync {
    /// Reads the OMAP header blob. Empty bytes (not an error) means "no
    /// header has ever been written" — the modern-format bootstrap case.
    async fn omap_get_header(&self, oid: &str) -> Result<Vec<u8>, StoreError>;

    /// Ordered, batched key-range read. `start` is an exclusive lower
    /// bound (empty string means "from the beginning"); `prefix` filters
    /// keys; at most `limit` entries are returned per call.
    async fn omap_get_vals(
        &self,
        oid: &str,
        start: &str,
        prefix: &str,
        limit: u64,
    ) -> Result<OmapPage, StoreError>;

    /// Full-object byte read, used only by the legacy load path.
    async fn read_full(&self, oid: &str) -> Result<Vec<u8>, StoreError>;

    /// Submits one atomic compound mutation.
    async fn mutate(&self, oid: &str, op: CompoundWrite) -> Result<(), StoreError>;
}
