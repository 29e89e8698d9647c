//! One client's negotiated state: capability bookkeeping, request
//! back-references, and the persisted [`SessionInfo`] payload (spec §3).

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use crate::codec::Decoder;
use crate::entity::EntityName;
use crate::error::DecodeError;
use crate::session_info::{Ino, SessionInfo};

/// Opaque back-reference to an in-flight request, owned by the journal/
/// request machinery (an external collaborator per spec §1). The session
/// map only ever stores and reorders these handles, never their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

/// Opaque back-reference to a capability grant, owned by the cap machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapId(pub u64);

/// The session's place in its lifecycle (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
    Stale,
    Killing,
}

impl SessionState {
    /// All states, in a fixed order — used to rebuild `by_state` from
    /// scratch after a load (spec §4.3 step 6).
    pub const ALL: [SessionState; 6] = [
        SessionState::Closed,
        SessionState::Opening,
        SessionState::Open,
        SessionState::Closing,
        SessionState::Stale,
        SessionState::Killing,
    ];

    /// States whose dirty sessions are actually serialized on save
    /// (spec §4.5 step 3c); `Opening` and `Closed` sessions are skipped.
    pub fn is_persisted_on_save(self) -> bool {
        matches!(
            self,
            SessionState::Open | SessionState::Closing | SessionState::Stale | SessionState::Killing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Stale => "stale",
            Self::Killing => "killing",
        };
        f.write_str(s)
    }
}

/// One row of the session map (spec §3).
#[derive(Debug, Clone)]
pub struct Session {
    /// Persisted payload.
    pub info: SessionInfo,
    pub state: SessionState,
    /// Bumped on every state transition.
    pub state_seq: u64,
    pub last_cap_renew: u64,
    /// Back-references into the request machinery; not owned here.
    pub requests: Vec<RequestId>,
    /// Back-references into the cap machinery; not owned here.
    pub caps: BTreeSet<CapId>,
    pub recalled_at: u64,
    pub recall_count: u64,
    pub recall_release_count: u64,
    pub pending_prealloc_inos: BTreeSet<Ino>,
    /// FIFO of projected versions awaiting commit for this session.
    pub projected_pv_queue: VecDeque<u64>,
    /// Presentation-only; derived from `info.client_metadata`.
    pub human_name: String,
}

impl Session {
    /// Builds a fresh, detached `Closed` session for `info`.
    pub fn new(info: SessionInfo) -> Self {
        let mut session = Self {
            info,
            state: SessionState::Closed,
            state_seq: 0,
            last_cap_renew: 0,
            requests: Vec::new(),
            caps: BTreeSet::new(),
            recalled_at: 0,
            recall_count: 0,
            recall_release_count: 0,
            pending_prealloc_inos: BTreeSet::new(),
            projected_pv_queue: VecDeque::new(),
            human_name: String::new(),
        };
        session.update_human_name();
        session
    }

    /// The session's stable primary key, if its inst has been set.
    pub fn name(&self) -> Option<EntityName> {
        self.info.inst.map(|inst| inst.name)
    }

    /// Records that a recall was sent down to `new_limit` caps (spec §4.6).
    ///
    /// Precondition: `new_limit < self.caps.len()` — asking a client to
    /// recall down to a limit it is already at or under is a programmer
    /// error (spec §7's `PreconditionError`), so this asserts rather than
    /// returning a recoverable error.
    pub fn notify_recall_sent(&mut self, new_limit: usize, now: u64) {
        assert!(
            new_limit < self.caps.len(),
            "notify_recall_sent: new_limit {new_limit} must be < held caps {}",
            self.caps.len()
        );
        if self.recalled_at == 0 {
            self.recalled_at = now;
            self.recall_count = (self.caps.len() - new_limit) as u64;
            self.recall_release_count = 0;
        }
    }

    /// Records that the client released `n` caps in response to a recall.
    pub fn notify_cap_release(&mut self, n: u64) {
        if self.recalled_at != 0 {
            self.recall_release_count += n;
            if self.recall_release_count >= self.recall_count {
                self.recalled_at = 0;
                self.recall_count = 0;
                self.recall_release_count = 0;
            }
        }
    }

    /// Replaces client metadata and recomputes `human_name`.
    pub fn set_client_metadata(&mut self, metadata: std::collections::BTreeMap<String, String>) {
        self.info.client_metadata = metadata;
        self.update_human_name();
    }

    /// Decodes a fresh `SessionInfo` into this session in place, preserving
    /// its identity (and thus its `by_state` linkage) — the "decode-into"
    /// operation spec §4.1/SPEC_FULL.md's duplicate-name recovery path
    /// needs, rather than constructing a brand-new `Session`.
    pub fn decode_info(&mut self, dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
        self.info = SessionInfo::decode(dec)?;
        self.update_human_name();
        Ok(())
    }

    /// Same as [`Self::decode_info`] but for the legacy bodyless encoding.
    pub fn decode_info_legacy_body(&mut self, dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
        self.info = SessionInfo::decode_legacy_body(dec)?;
        self.update_human_name();
        Ok(())
    }

    /// Overwrites this session's `info` from an already-decoded legacy
    /// record, preserving identity (spec §4.1's duplicate-name recovery
    /// path) and stamping `last_cap_renew` the way legacy load does for
    /// every reconstructed session (spec §4.4).
    pub fn restore_legacy_info(&mut self, info: SessionInfo, now: u64) {
        self.info = info;
        self.last_cap_renew = now;
        self.update_human_name();
    }

    /// Derives the presentation-only `human_name` (spec §4.6):
    /// `hostname[:entity_id]`, falling back to the numeric id.
    fn update_human_name(&mut self) {
        let Some(inst) = self.info.inst else {
            self.human_name = String::new();
            return;
        };
        match self.info.client_metadata.get("hostname") {
            Some(hostname) => {
                let mut name = hostname.clone();
                if let Some(entity_id) = self.info.client_metadata.get("entity_id") {
                    if *entity_id != inst.name.default_entity_id() {
                        name.push(':');
                        name.push_str(entity_id);
                    }
                }
                self.human_name = name;
            }
            None => {
                self.human_name = inst.name.id.to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityInst;
    use std::collections::BTreeMap;

    fn session_with(metadata: &[(&str, &str)]) -> Session {
        let inst = EntityInst::new(EntityName::client(42), "127.0.0.1:6801".parse().unwrap());
        let mut session = Session::new(SessionInfo::new(inst));
        let mut md = BTreeMap::new();
        for (k, v) in metadata {
            md.insert((*k).to_string(), (*v).to_string());
        }
        session.set_client_metadata(md);
        session
    }

    #[test]
    fn human_name_falls_back_to_numeric_id() {
        let session = session_with(&[]);
        assert_eq!(session.human_name, "42");
    }

    #[test]
    fn human_name_uses_hostname_when_present() {
        let session = session_with(&[("hostname", "box1")]);
        assert_eq!(session.human_name, "box1");
    }

    #[test]
    fn human_name_appends_non_default_entity_id() {
        let session = session_with(&[("hostname", "box1"), ("entity_id", "alice")]);
        assert_eq!(session.human_name, "box1:alice");
    }

    #[test]
    fn human_name_suppresses_default_entity_id() {
        let session = session_with(&[("hostname", "box1"), ("entity_id", "42")]);
        assert_eq!(session.human_name, "box1");
    }

    #[test]
    fn recall_lifecycle_clears_after_enough_releases() {
        let mut session = session_with(&[]);
        session.caps.insert(CapId(1));
        session.caps.insert(CapId(2));
        session.caps.insert(CapId(3));
        session.notify_recall_sent(1, 1_000);
        assert_eq!(session.recalled_at, 1_000);
        assert_eq!(session.recall_count, 2);
        session.notify_cap_release(1);
        assert_eq!(session.recalled_at, 1_000, "not fully released yet");
        session.notify_cap_release(1);
        assert_eq!(session.recalled_at, 0, "fully released, recall cleared");
        assert_eq!(session.recall_count, 0);
        assert_eq!(session.recall_release_count, 0);
    }

    #[test]
    fn second_recall_sent_is_a_no_op_while_one_is_outstanding() {
        let mut session = session_with(&[]);
        session.caps.insert(CapId(1));
        session.caps.insert(CapId(2));
        session.notify_recall_sent(1, 1_000);
        session.notify_recall_sent(0, 2_000);
        assert_eq!(session.recalled_at, 1_000, "first recall timestamp sticks");
    }

    #[test]
    #[should_panic(expected = "notify_recall_sent")]
    fn notify_recall_sent_rejects_limit_at_or_above_held_caps() {
        let mut session = session_with(&[]);
        session.caps.insert(CapId(1));
        session.notify_recall_sent(1, 1_000);
    }
}
