//! In-memory [`Objecter`] used by unit and integration tests.
//!
//! Stores exactly the shape spec §6 describes for one object: an OMAP
//! header blob, an ordered OMAP body, and a raw byte payload (used only by
//! the legacy format). Failures can be injected one-shot per operation kind
//! to exercise the fatal-on-I/O-error paths in spec §7.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::objecter::{CompoundWrite, Objecter, OmapPage};

#[derive(Debug, Clone, Default)]
struct FakeObject {
    header: Vec<u8>,
    omap: BTreeMap<String, Vec<u8>>,
    bytes: Vec<u8>,
}

/// An in-memory stand-in for the real object-store client.
#[derive(Debug, Default)]
pub struct FakeObjecter {
    objects: Mutex<HashMap<String, FakeObject>>,
    fail_next_header: AtomicBool,
    fail_next_vals: AtomicBool,
    fail_next_read_full: AtomicBool,
    fail_next_mutate: AtomicBool,
    mutate_count: std::sync::atomic::AtomicU64,
}

impl FakeObjecter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object with a legacy-format raw byte payload and no OMAP,
    /// as if it had been written by a pre-upgrade rank.
    pub async fn seed_legacy_bytes(&self, oid: &str, bytes: Vec<u8>) {
        let mut objects = self.objects.lock().await;
        objects.entry(oid.to_string()).or_default().bytes = bytes;
    }

    /// Makes the next call to `omap_get_header` fail.
    pub fn fail_next_header(&self) {
        self.fail_next_header.store(true, Ordering::SeqCst);
    }

    /// Makes the next call to `omap_get_vals` fail.
    pub fn fail_next_vals(&self) {
        self.fail_next_vals.store(true, Ordering::SeqCst);
    }

    /// Makes the next call to `read_full` fail.
    pub fn fail_next_read_full(&self) {
        self.fail_next_read_full.store(true, Ordering::SeqCst);
    }

    /// Makes the next call to `mutate` fail.
    pub fn fail_next_mutate(&self) {
        self.fail_next_mutate.store(true, Ordering::SeqCst);
    }

    /// Number of successful `mutate` calls so far — tests use this to
    /// assert that coalesced saves issue exactly one object-store op.
    pub fn mutate_count(&self) -> u64 {
        self.mutate_count.load(Ordering::SeqCst)
    }

    /// Snapshot of the object's current OMAP body, for assertions.
    pub async fn omap_snapshot(&self, oid: &str) -> BTreeMap<String, Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(oid)
            .map(|o| o.omap.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the object's raw byte payload, for assertions.
    pub async fn bytes_snapshot(&self, oid: &str) -> Vec<u8> {
        self.objects
            .lock()
            .await
            .get(oid)
            .map(|o| o.bytes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Objecter for FakeObjecter {
    async fn omap_get_header(&self, oid: &str) -> Result<Vec<u8>, StoreError> {
        if self.fail_next_header.swap(false, Ordering::SeqCst) {
            return Err(StoreError::from("injected omap_get_header failure"));
        }
        let objects = self.objects.lock().await;
        Ok(objects.get(oid).map(|o| o.header.clone()).unwrap_or_default())
    }

    async fn omap_get_vals(
        &self,
        oid: &str,
        start: &str,
        prefix: &str,
        limit: u64,
    ) -> Result<OmapPage, StoreError> {
        if self.fail_next_vals.swap(false, Ordering::SeqCst) {
            return Err(StoreError::from("injected omap_get_vals failure"));
        }
        let objects = self.objects.lock().await;
        let Some(object) = objects.get(oid) else {
            return Ok(OmapPage::default());
        };
        let entries = object
            .omap
            .range(start.to_string()..)
            .filter(|(k, _)| k.as_str() != start && k.starts_with(prefix))
            .take(limit as usize)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(OmapPage { entries })
    }

    async fn read_full(&self, oid: &str) -> Result<Vec<u8>, StoreError> {
        if self.fail_next_read_full.swap(false, Ordering::SeqCst) {
            return Err(StoreError::from("injected read_full failure"));
        }
        let objects = self.objects.lock().await;
        Ok(objects.get(oid).map(|o| o.bytes.clone()).unwrap_or_default())
    }

    async fn mutate(&self, oid: &str, op: CompoundWrite) -> Result<(), StoreError> {
        if self.fail_next_mutate.swap(false, Ordering::SeqCst) {
            return Err(StoreError::from("injected mutate failure"));
        }
        let mut objects = self.objects.lock().await;
        let object = objects.entry(oid.to_string()).or_default();
        if op.truncate_to_zero {
            object.bytes.clear();
        }
        if let Some(header) = op.omap_set_header {
            object.header = header;
        }
        for (k, v) in op.omap_set {
            object.omap.insert(k, v);
        }
        for k in &op.omap_rm_keys {
            object.omap.remove(k);
        }
        self.mutate_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mutate_applies_header_set_and_remove_atomically() {
        let objecter = FakeObjecter::new();
        let mut op = CompoundWrite::default();
        op.omap_set_header = Some(vec![1, 2, 3]);
        op.omap_set.insert("client.1".into(), vec![9]);
        objecter.mutate("oid", op).await.unwrap();

        assert_eq!(objecter.omap_get_header("oid").await.unwrap(), vec![1, 2, 3]);
        let snapshot = objecter.omap_snapshot("oid").await;
        assert_eq!(snapshot.get("client.1"), Some(&vec![9]));

        let mut op2 = CompoundWrite::default();
        op2.omap_rm_keys.insert("client.1".into());
        objecter.mutate("oid", op2).await.unwrap();
        assert!(objecter.omap_snapshot("oid").await.is_empty());
        assert_eq!(objecter.mutate_count(), 2);
    }

    #[tokio::test]
    async fn injected_failure_fires_exactly_once() {
        let objecter = FakeObjecter::new();
        objecter.fail_next_header();
        assert!(objecter.omap_get_header("oid").await.is_err());
        assert!(objecter.omap_get_header("oid").await.is_ok());
    }

    #[tokio::test]
    async fn omap_get_vals_respects_exclusive_start_and_limit() {
        let objecter = FakeObjecter::new();
        let mut op = CompoundWrite::default();
        for i in 1..=4 {
            op.omap_set.insert(format!("client.{i}"), vec![i as u8]);
        }
        objecter.mutate("oid", op).await.unwrap();

        let page = objecter
            .omap_get_vals("oid", "", "", 2)
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].0, "client.1");
        assert_eq!(page.entries[1].0, "client.2");

        let page2 = objecter
            .omap_get_vals("oid", "client.2", "", 2)
            .await
            .unwrap();
        assert_eq!(page2.entries.len(), 2);
        assert_eq!(page2.entries[0].0, "client.3");
        assert_eq!(page2.entries[1].0, "client.4");
    }
}
