//! The persistence protocol adapter (spec §2 component 4, §4.3–§4.5): drives
//! [`SessionMap`]'s load/save state machines against an [`Objecter`],
//! re-entering the map's serialized context (its `Mutex`) only at the points
//! the pure state machine actually needs to observe or mutate state.
//!
//! Only `load` and `save` cross an await boundary while the map is
//! unlocked — matching spec §5's "only load and save cross the thread
//! boundary": `save` hands its compound write off to a spawned completion
//! task and returns immediately, so other mutations are never blocked
//! behind an in-flight commit.
//!
//! Phase transitions (legacy fallback, each batch decoded, a save
//! coalescing vs. composing a fresh write) are logged at `debug`; a
//! completed load or save is logged once at `info`; a fatal save failure
//! is logged at `error` before the process aborts (spec §7).

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::codec::Decoder;
use crate::error::MapError;
use crate::objecter::Objecter;
use crate::session_map::{Completion, SaveDecision, SessionMap};

/// Shared handle a caller wraps around a [`SessionMap`] to drive load/save.
pub type SharedSessionMap = Arc<Mutex<SessionMap>>;

fn fire_all(completions: Vec<Completion>) {
    for completion in completions {
        let _ = completion.send(());
    }
}

/// Spec §4.3/§4.4: loads `oid` into `map`, releasing `completion` (and every
/// other registered load waiter) once the map is fully populated.
///
/// I/O failures are fatal per spec §7: this returns `Err` rather than
/// aborting itself, leaving the decision of *how* to terminate the rank to
/// the caller, but no caller should attempt to keep using `map` afterward.
pub async fn load(
    map: &SharedSessionMap,
    objecter: &dyn Objecter,
    oid: &str,
    completion: Completion,
) -> Result<(), MapError> {
    {
        let mut guard = map.lock().await;
        guard.waiting_for_load.push(completion);
    }
    let keys_per_op = map.lock().await.config.keys_per_op;

    // Phase A: a compound read of the header and the first values page.
    let (header_result, first_page_result) = tokio::join!(
        objecter.omap_get_header(oid),
        objecter.omap_get_vals(oid, "", "", keys_per_op),
    );
    let header_bytes = header_result.map_err(MapError::from)?;

    if header_bytes.is_empty() {
        debug!(oid, "no header found, falling back to legacy load path");
        return load_legacy(map, objecter, oid).await;
    }

    {
        let mut guard = map.lock().await;
        guard.store.decode_header(&mut Decoder::new(&header_bytes))?;
    }

    let mut page = first_page_result.map_err(MapError::from)?;
    let mut sessions_loaded = 0u64;
    loop {
        let is_full_batch = page.entries.len() as u64 == keys_per_op;
        let last_key = page.entries.last().map(|(k, _)| k.clone());
        sessions_loaded += page.entries.len() as u64;
        {
            let mut guard = map.lock().await;
            guard.store.decode_values(&page.entries)?;
        }
        debug!(oid, batch_len = page.entries.len(), sessions_loaded, "decoded omap values batch");
        if !is_full_batch {
            break;
        }
        let start = last_key.expect("a full batch always has a last key");
        page = objecter
            .omap_get_vals(oid, &start, "", keys_per_op)
            .await
            .map_err(MapError::from)?;
    }

    let version = map.lock().await.store.version;
    let completions = map.lock().await.finalize_load();
    info!(oid, version, sessions_loaded, "session map load complete");
    fire_all(completions);
    Ok(())
}

async fn load_legacy(
    map: &SharedSessionMap,
    objecter: &dyn Objecter,
    oid: &str,
) -> Result<(), MapError> {
    let now = {
        let guard = map.lock().await;
        guard.config.clock.now_millis()
    };
    let bytes = objecter.read_full(oid).await.map_err(MapError::from)?;
    let mut guard = map.lock().await;
    guard.store.decode_legacy(&bytes, now)?;
    debug!(oid, "decoded legacy byte payload");
    let version = guard.store.version;
    let sessions_loaded = guard.store.sessions.len();
    let completions = guard.finalize_legacy_load();
    drop(guard);
    info!(oid, version, sessions_loaded, "session map legacy load complete, upgrade pending");
    fire_all(completions);
    Ok(())
}

/// Spec §4.5: drives one save request. The synchronous bookkeeping (steps
/// 1-4) runs under the lock and returns before this function does; if a new
/// commit must be submitted, the actual object-store `mutate` and its
/// completion handling run in a spawned task so this call never blocks on
/// I/O (spec §5's suspension-point contract).
///
/// Returns the spawned task's handle when a new commit was submitted, or
/// `None` when the request collapsed onto one already in flight — most
/// callers can drop it, but tests use it to await completion deterministically.
pub async fn save(
    map: SharedSessionMap,
    objecter: Arc<dyn Objecter>,
    oid: Arc<str>,
    needv: u64,
    completion: Completion,
) -> Option<tokio::task::JoinHandle<()>> {
    let decision = {
        let mut guard = map.lock().await;
        guard.prepare_save(needv, completion)
    };
    match &decision {
        SaveDecision::Coalesced { waiting_on } => {
            debug!(oid = %oid, needv, waiting_on, "save request coalesced onto in-flight commit");
        }
        SaveDecision::Submit { version, .. } => {
            debug!(oid = %oid, needv, version, "save request composed a fresh compound write");
        }
    }
    submit(map, objecter, oid, decision)
}

/// Submits a [`SaveDecision`] already produced by
/// [`SessionMap::prepare_save`] — shared by [`save`] and by callers reacting
/// to a [`crate::session_map::MarkDirtyOutcome::preemptive_save`] that
/// `mark_dirty` already ran inline.
pub fn submit(
    map: SharedSessionMap,
    objecter: Arc<dyn Objecter>,
    oid: Arc<str>,
    decision: SaveDecision,
) -> Option<tokio::task::JoinHandle<()>> {
    let (version, op) = match decision {
        SaveDecision::Coalesced { .. } => return None,
        SaveDecision::Submit { version, op } => (version, op),
    };

    Some(tokio::spawn(async move {
        match objecter.mutate(&oid, op).await {
            Ok(()) => {
                let completions = map.lock().await.complete_save(version);
                info!(oid = %oid, version, "session map save complete");
                fire_all(completions);
            }
            Err(e) => {
                tracing::error!(error = %e, oid = %oid, version, "session map save failed, aborting rank");
                std::process::abort();
            }
        }
    }))
}
