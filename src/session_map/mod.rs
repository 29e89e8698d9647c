//! `SessionMap`: the live, rank-owned session table (spec §3/§4.2–§4.5).
//!
//! This module is the pure, synchronous half of the component: every method
//! here only touches in-memory state and never awaits. The asynchronous
//! load/save state machines that drive it against an [`crate::objecter::Objecter`]
//! live in [`crate::session_map::persistence`] — kept separate so the
//! invariants below can be unit-tested without any I/O.

pub mod persistence;

use std::collections::{BTreeMap, HashMap};

use tokio::sync::oneshot;

use crate::config::SessionMapConfig;
use crate::entity::EntityName;
use crate::objecter::CompoundWrite;
use crate::session::{Session, SessionState};
use crate::session_info::Ino;
use crate::store::SessionMapStore;

/// A registered completion, fired exactly once when its target version
/// becomes durable (or, for `waiting_for_load`, when load finishes).
pub type Completion = oneshot::Sender<()>;

/// Outcome of [`SessionMap::mark_dirty`]: whether the caller must drive a
/// preemptive save before the batch cap is exceeded (spec §4.2 `_mark_dirty`).
#[derive(Debug)]
pub struct MarkDirtyOutcome {
    /// `Some(decision)` when `|dirty_sessions|` had already reached the
    /// configured cap: [`SessionMap::prepare_save`] already ran inline
    /// (with a dropped no-op completion) before the new name was inserted,
    /// so the caller only needs to submit the resulting op to the
    /// object store — see [`crate::session_map::persistence::submit`].
    pub preemptive_save: Option<SaveDecision>,
    /// The projected version popped off the session's queue, if any.
    pub popped_projected_version: Option<u64>,
}

/// What [`SessionMap::prepare_save`] decided to do with a save request.
#[derive(Debug)]
pub enum SaveDecision {
    /// A commit already in flight covers `needv`; the completion was
    /// enqueued on it and no new object-store operation is needed.
    Coalesced { waiting_on: u64 },
    /// A new commit must be submitted for `version`, carrying `op`.
    Submit { version: u64, op: CompoundWrite },
}

/// The live session table for one rank (spec §3).
pub struct SessionMap {
    pub store: SessionMapStore,
    /// Secondary index: one ordered list of names per state (spec §3 I2).
    pub by_state: HashMap<SessionState, Vec<EntityName>>,
    pub dirty_sessions: std::collections::BTreeSet<EntityName>,
    pub null_sessions: std::collections::BTreeSet<EntityName>,
    pub projected: u64,
    pub committing: u64,
    pub committed: u64,
    pub commit_waiters: BTreeMap<u64, Vec<Completion>>,
    pub waiting_for_load: Vec<Completion>,
    pub loaded_legacy: bool,
    pub config: SessionMapConfig,
}

impl std::fmt::Debug for SessionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMap")
            .field("sessions", &self.store.sessions.len())
            .field("version", &self.store.version)
            .field("projected", &self.projected)
            .field("committing", &self.committing)
            .field("committed", &self.committed)
            .field("loaded_legacy", &self.loaded_legacy)
            .finish_non_exhaustive()
    }
}

impl SessionMap {
    pub fn new(config: SessionMapConfig) -> Self {
        Self {
            store: SessionMapStore::new(),
            by_state: HashMap::new(),
            dirty_sessions: Default::default(),
            null_sessions: Default::default(),
            projected: 0,
            committing: 0,
            committed: 0,
            commit_waiters: BTreeMap::new(),
            waiting_for_load: Vec::new(),
            loaded_legacy: false,
            config,
        }
    }

    pub fn version(&self) -> u64 {
        self.store.version
    }

    fn link_into_by_state(&mut self, name: EntityName, state: SessionState) {
        self.by_state.entry(state).or_default().push(name);
    }

    fn unlink_from_by_state(&mut self, name: EntityName, state: SessionState) {
        if let Some(list) = self.by_state.get_mut(&state) {
            if let Some(pos) = list.iter().position(|n| *n == name) {
                list.remove(pos);
            }
        }
    }

    /// Precondition: `session.name()` is set and not already present.
    pub fn add_session(&mut self, session: Session) {
        let name = session
            .name()
            .expect("add_session: session must carry a name");
        assert!(
            !self.store.sessions.contains_key(&name),
            "add_session: {name} already present"
        );
        let state = session.state;
        self.store.sessions.insert(name, session);
        self.link_into_by_state(name, state);
        self.null_sessions.remove(&name);
    }

    /// Unlinks and removes `name`. Returns the removed `Session`, if any,
    /// so the caller (the owner of `requests`/`caps` back-references) can
    /// finish tearing it down.
    ///
    /// Per spec §4.2, `name` is moved into `null_sessions` only if it was
    /// already in `dirty_sessions` — a session that was never dirtied since
    /// its last save is not re-queued for deletion here.
    pub fn remove_session(&mut self, name: EntityName) -> Option<Session> {
        let mut session = self.store.sessions.remove(&name)?;
        session.requests.clear();
        self.unlink_from_by_state(name, session.state);
        if self.dirty_sessions.remove(&name) {
            self.null_sessions.insert(name);
        }
        Some(session)
    }

    /// Precondition: `name` names a live session.
    pub fn set_state(&mut self, name: EntityName, new: SessionState) -> u64 {
        let old = self
            .store
            .sessions
            .get(&name)
            .unwrap_or_else(|| panic!("set_state: no such session {name}"))
            .state;
        if new == old {
            return self.store.sessions[&name].state_seq;
        }
        self.unlink_from_by_state(name, old);
        self.link_into_by_state(name, new);
        let session = self.store.sessions.get_mut(&name).unwrap();
        session.state = new;
        session.state_seq += 1;
        session.state_seq
    }

    /// Precondition: `name` names a currently linked (live) session.
    pub fn touch_session(&mut self, name: EntityName, now: u64) {
        let state = self
            .store
            .sessions
            .get(&name)
            .unwrap_or_else(|| panic!("touch_session: no such session {name}"))
            .state;
        self.unlink_from_by_state(name, state);
        self.link_into_by_state(name, state);
        self.store.sessions.get_mut(&name).unwrap().last_cap_renew = now;
    }

    /// Spec §4.2 `mark_dirty`/`_mark_dirty`, combined. When the dirty set
    /// has already reached the configured cap, [`Self::prepare_save`] runs
    /// *inline* — with a no-op completion whose receiver is immediately
    /// dropped — before `name` is inserted. Because `prepare_save` clears
    /// `dirty_sessions` synchronously as part of composing its op, this
    /// means the over-threshold insert always lands in a freshly emptied
    /// dirty set, never in the batch being preempted (spec §9's documented
    /// intentional backpressure).
    pub fn mark_dirty(&mut self, name: EntityName) -> MarkDirtyOutcome {
        let preemptive_save = if self.dirty_sessions.len() as u64 >= self.config.keys_per_op {
            let (completion, _dropped) = oneshot::channel();
            Some(self.prepare_save(self.store.version, completion))
        } else {
            None
        };
        self.dirty_sessions.insert(name);
        self.null_sessions.remove(&name);
        self.store.version += 1;
        let popped_projected_version = self
            .store
            .sessions
            .get_mut(&name)
            .and_then(|s| s.projected_pv_queue.pop_front());
        MarkDirtyOutcome {
            preemptive_save,
            popped_projected_version,
        }
    }

    pub fn mark_projected(&mut self, name: EntityName) -> u64 {
        self.projected += 1;
        let projected = self.projected;
        if let Some(session) = self.store.sessions.get_mut(&name) {
            session.projected_pv_queue.push_back(projected);
        }
        projected
    }

    /// Journal-replay entry point: marks `name` dirty and advances
    /// `version` without ever considering a preemptive save.
    pub fn replay_dirty_session(&mut self, name: EntityName) {
        self.dirty_sessions.insert(name);
        self.null_sessions.remove(&name);
        self.store.version += 1;
    }

    pub fn replay_advance_version(&mut self) {
        self.store.version += 1;
    }

    /// Removes every session, then sets `version = ++projected`.
    pub fn wipe(&mut self) {
        let names: Vec<EntityName> = self.store.sessions.keys().copied().collect();
        for name in names {
            self.remove_session(name);
        }
        self.projected += 1;
        self.store.version = self.projected;
        debug_assert!(
            self.by_state.values().all(|list| list.is_empty()),
            "wipe: by_state must be empty once every session is removed"
        );
    }

    /// Clears per-session inode pre-allocation, then `projected = ++version`.
    pub fn wipe_ino_prealloc(&mut self) {
        for session in self.store.sessions.values_mut() {
            session.pending_prealloc_inos.clear();
            session.info.prealloc_inos.clear();
        }
        self.store.version += 1;
        self.projected = self.store.version;
    }

    /// Rebuilds `by_state` from scratch (spec §4.3 step 6 / §4.4), in a
    /// fixed state order so the resulting per-state lists are deterministic
    /// given a deterministic session insertion order.
    pub fn rebuild_by_state(&mut self) {
        self.by_state.clear();
        for state in SessionState::ALL {
            self.by_state.insert(state, Vec::new());
        }
        let mut names: Vec<EntityName> = self.store.sessions.keys().copied().collect();
        names.sort();
        for name in names {
            let state = self.store.sessions[&name].state;
            self.by_state.entry(state).or_default().push(name);
        }
    }

    /// Finishes a modern-format load (spec §4.3 step 6): rebuild indices,
    /// converge the version lineage, release load waiters.
    pub fn finalize_load(&mut self) -> Vec<Completion> {
        self.rebuild_by_state();
        self.projected = self.store.version;
        self.committing = self.store.version;
        self.committed = self.store.version;
        std::mem::take(&mut self.waiting_for_load)
    }

    /// Finishes a legacy load (spec §4.4): like [`Self::finalize_load`] but
    /// also marks every name dirty in one shot, bypassing the `K`-batch
    /// preemption, and raises `loaded_legacy` so the next save upgrades the
    /// object to the modern format.
    pub fn finalize_legacy_load(&mut self) -> Vec<Completion> {
        let names: Vec<EntityName> = self.store.sessions.keys().copied().collect();
        for name in names {
            self.dirty_sessions.insert(name);
        }
        self.loaded_legacy = true;
        self.finalize_load()
    }

    /// Spec §4.5 steps 1-4: decides whether this save request coalesces
    /// onto an in-flight commit, or composes a fresh compound write and
    /// clears the dirty overlay. Fully synchronous; the caller (the
    /// persistence adapter) is responsible for actually submitting `op`.
    pub fn prepare_save(&mut self, needv: u64, completion: Completion) -> SaveDecision {
        if needv > 0 && self.committing >= needv {
            assert!(
                self.committing > self.committed,
                "prepare_save: a commit in flight must be ahead of committed"
            );
            self.commit_waiters
                .entry(self.committing)
                .or_default()
                .push(completion);
            return SaveDecision::Coalesced {
                waiting_on: self.committing,
            };
        }

        let version = self.store.version;
        self.commit_waiters.entry(version).or_default().push(completion);
        self.committing = version;

        let mut op = CompoundWrite::default();
        let mut header_enc = crate::codec::Encoder::new();
        self.store.encode_header(&mut header_enc);
        op.omap_set_header = Some(header_enc.into_vec());

        if self.loaded_legacy {
            op.truncate_to_zero = true;
            self.loaded_legacy = false;
        }

        for name in &self.dirty_sessions {
            if let Some(session) = self.store.sessions.get(name) {
                if session.state.is_persisted_on_save() {
                    let mut enc = crate::codec::Encoder::new();
                    session.info.encode(&mut enc);
                    op.omap_set.insert(name.to_key_string(), enc.into_vec());
                }
            }
        }
        for name in &self.null_sessions {
            op.omap_rm_keys.insert(name.to_key_string());
        }

        self.dirty_sessions.clear();
        self.null_sessions.clear();

        SaveDecision::Submit { version, op }
    }

    /// Spec §4.5 step 5: publishes `committed = version` and returns the
    /// completions to fire.
    pub fn complete_save(&mut self, version: u64) -> Vec<Completion> {
        self.committed = version;
        self.commit_waiters.remove(&version).unwrap_or_default()
    }

    /// Returns the `Ino`s currently pre-allocated to `name`, if it exists —
    /// a thin read helper used by tests and callers that don't need the
    /// whole `Session`.
    pub fn prealloc_inos(&self, name: EntityName) -> Option<&std::collections::BTreeSet<Ino>> {
        self.store.sessions.get(&name).map(|s| &s.info.prealloc_inos)
    }
}
