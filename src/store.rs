//! `SessionMapStore`: the pure, I/O-free in-memory index plus codec for
//! both the modern and legacy on-disk representations (spec §4.1).
//!
//! Everything here is deterministic and side-effect-free except for the
//! `now` timestamps threaded through the legacy path, which the caller
//! supplies explicitly (spec §9's clock-as-dependency note) rather than
//! reading a global clock.

use std::collections::HashMap;
use std::fmt;

use crate::codec::{Decoder, Encoder};
use crate::entity::EntityName;
use crate::error::DecodeError;
use crate::session::{Session, SessionState};
use crate::session_info::SessionInfo;

/// `struct_v`/`compat_v` for the OMAP header frame (spec §6).
const HEADER_STRUCT_V: u8 = 1;
const HEADER_COMPAT_V: u8 = 1;
/// `struct_v`/`compat_v` for the sentinel-prefixed legacy frame (spec §4.1).
const LEGACY_SENTINEL_STRUCT_V: u8 = 2;
const LEGACY_SENTINEL_COMPAT_V: u8 = 2;
/// First-word value that discriminates the sentinel legacy variant from the
/// plain-version old-format variant.
const LEGACY_SENTINEL: u64 = u64::MAX;

/// Which of the two legacy on-disk shapes a byte payload uses (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyFormat {
    /// First word is the sentinel `~0`; the rest is a versioned frame.
    Sentinel,
    /// First word is the version itself, followed by a discarded `u32`
    /// "upper bound" count and a run of bare `SessionInfo` records.
    OldPlain,
}

impl LegacyFormat {
    /// Peeks the first `u64` of `bytes` without consuming anything, and
    /// decides which legacy variant it introduces. Callers must still
    /// handle `bytes.is_empty()` themselves — an empty payload isn't a
    /// format to sniff, it's "nothing was ever written".
    pub fn sniff(bytes: &[u8]) -> Result<Self, DecodeError> {
        let first = Decoder::new(bytes).peek_u64()?;
        Ok(if first == LEGACY_SENTINEL {
            Self::Sentinel
        } else {
            Self::OldPlain
        })
    }
}

/// The in-memory session index plus the codec for turning it into, and
/// back out of, the bytes of one object (spec §4.1).
#[derive(Debug, Default)]
pub struct SessionMapStore {
    pub sessions: HashMap<EntityName, Session>,
    pub version: u64,
}

impl SessionMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing session for `name`, or inserts and returns a
    /// fresh `Closed` one. Used by the modern decode path, which learns a
    /// session's address only once its `SessionInfo` body has been read.
    pub fn get_or_add_session(&mut self, name: EntityName) -> &mut Session {
        self.sessions.entry(name).or_insert_with(|| {
            let unspecified = "0.0.0.0:0".parse().expect("static address parses");
            Session::new(SessionInfo::new(crate::entity::EntityInst::new(
                name, unspecified,
            )))
        })
    }

    /// Encodes the OMAP header: just the map's `version` (spec §6).
    pub fn encode_header(&self, enc: &mut Encoder) {
        enc.encode_frame(HEADER_STRUCT_V, HEADER_COMPAT_V, |e| {
            e.put_u64(self.version);
        });
    }

    /// Decodes the OMAP header and sets `self.version`.
    pub fn decode_header(&mut self, dec: &mut Decoder<'_>) -> Result<(), DecodeError> {
        let (_, mut body) = dec.decode_frame(HEADER_COMPAT_V)?;
        self.version = body.get_u64()?;
        Ok(())
    }

    /// Decodes one batch of `(key, value)` OMAP entries (spec §4.1/§4.3).
    ///
    /// A newly created session whose state is `Closed` is promoted to
    /// `Open` — load never leaves a freshly-discovered session `Closed`.
    pub fn decode_values(&mut self, entries: &[(String, Vec<u8>)]) -> Result<(), DecodeError> {
        for (key, bytes) in entries {
            let name: EntityName = key.parse()?;
            let was_new = !self.sessions.contains_key(&name);
            let mut dec = Decoder::new(bytes);
            let session = self.get_or_add_session(name);
            session.decode_info(&mut dec)?;
            if was_new && session.state == SessionState::Closed {
                session.state = SessionState::Open;
            }
        }
        Ok(())
    }

    /// Decodes the legacy whole-object byte payload (spec §4.1).
    ///
    /// Both recognized variants decode to end-of-buffer: the sentinel
    /// variant's record list is bounded by its frame length; the
    /// old-format variant's `u32` count is a documented "meaningless upper
    /// bound" (spec §9) and is read only to be discarded, with the record
    /// list likewise running to end-of-buffer. A name seen twice in the
    /// old-format variant decodes into the existing `Session` in place
    /// (preserving its identity) rather than replacing it — the "eager
    /// reconnect" recovery path.
    pub fn decode_legacy(&mut self, bytes: &[u8], now: u64) -> Result<(), DecodeError> {
        let mut dec = Decoder::new(bytes);
        if dec.is_empty() {
            self.version = 0;
            return Ok(());
        }

        let (version, mut body) = match LegacyFormat::sniff(bytes)? {
            LegacyFormat::Sentinel => {
                dec.get_u64()?;
                let (_, mut body) = dec.decode_frame(LEGACY_SENTINEL_COMPAT_V)?;
                let version = body.get_u64()?;
                (version, body)
            }
            LegacyFormat::OldPlain => {
                let version = dec.get_u64()?;
                let _meaningless_upper_bound = dec.get_u32()?;
                (version, dec)
            }
        };

        while !body.is_empty() {
            let info = SessionInfo::decode_legacy_body(&mut body)?;
            let name = info
                .inst
                .ok_or_else(|| {
                    DecodeError::MalformedValue("legacy session record has no inst".to_string())
                })?
                .name;
            match self.sessions.get_mut(&name) {
                Some(existing) => existing.restore_legacy_info(info, now),
                None => {
                    let mut session = Session::new(info);
                    session.last_cap_renew = now;
                    // `state` has no persisted representation (spec §3); a
                    // freshly reconstructed session defaults to `Open`, the
                    // same promotion `decode_values` applies for the modern
                    // format, so the upcoming upgrade save actually writes
                    // it out instead of skipping it as `Closed`.
                    session.state = SessionState::Open;
                    self.sessions.insert(name, session);
                }
            }
        }
        self.version = version;
        Ok(())
    }

    /// Builds a handful of representative instances, used by
    /// [`tests::generated_instances_round_trip_through_the_modern_codec`]
    /// below to exercise spec §8's round-trip property
    /// (`decode(encode(M)) == M`) without hand-writing each fixture twice.
    pub fn generate_test_instances(out: &mut Vec<SessionMapStore>) {
        out.push(SessionMapStore::new());

        let mut one_session = SessionMapStore::new();
        let inst = crate::entity::EntityInst::new(
            EntityName::client(1),
            "127.0.0.1:6801".parse().unwrap(),
        );
        let mut session = Session::new(SessionInfo::new(inst));
        session.state = SessionState::Open;
        one_session.sessions.insert(inst.name, session);
        one_session.version = 1;
        out.push(one_session);

        let mut many_sessions = SessionMapStore::new();
        for i in 1..=4u64 {
            let inst = crate::entity::EntityInst::new(
                EntityName::client(i),
                "127.0.0.1:6801".parse().unwrap(),
            );
            let mut session = Session::new(SessionInfo::new(inst));
            session.state = SessionState::Open;
            many_sessions.sessions.insert(inst.name, session);
        }
        many_sessions.version = 7;
        out.push(many_sessions);
    }
}

/// Human-readable dump of every session, one per line, for debugging and
/// diagnostics — sorted by name so the output is deterministic.
impl fmt::Display for SessionMapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&EntityName> = self.sessions.keys().collect();
        names.sort();
        for name in names {
            let session = &self.sessions[name];
            writeln!(
                f,
                "{name} state={} human_name={}",
                session.state, session.human_name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, Encoder};
    use crate::entity::EntityInst;

    #[test]
    fn header_round_trips() {
        let mut store = SessionMapStore::new();
        store.version = 42;
        let mut enc = Encoder::new();
        store.encode_header(&mut enc);
        let bytes = enc.into_vec();
        let mut decoded = SessionMapStore::new();
        decoded
            .decode_header(&mut Decoder::new(&bytes))
            .expect("header decodes");
        assert_eq!(decoded.version, 42);
    }

    #[test]
    fn decode_values_promotes_new_closed_session_to_open() {
        let mut store = SessionMapStore::new();
        let inst = EntityInst::new(EntityName::client(1), "127.0.0.1:6801".parse().unwrap());
        let info = SessionInfo::new(inst);
        let mut enc = Encoder::new();
        info.encode(&mut enc);
        let entries = vec![(inst.name.to_key_string(), enc.into_vec())];
        store.decode_values(&entries).unwrap();
        assert_eq!(store.sessions[&inst.name].state, SessionState::Open);
    }

    #[test]
    fn decode_values_rejects_malformed_key() {
        let mut store = SessionMapStore::new();
        let entries = vec![("not-a-valid-key".to_string(), Vec::new())];
        assert!(store.decode_values(&entries).is_err());
    }

    #[test]
    fn legacy_format_sniff_recognizes_sentinel() {
        let mut enc = Encoder::new();
        enc.put_u64(LEGACY_SENTINEL);
        enc.put_u64(0);
        assert_eq!(LegacyFormat::sniff(&enc.into_vec()).unwrap(), LegacyFormat::Sentinel);
    }

    #[test]
    fn legacy_format_sniff_recognizes_old_plain() {
        let mut enc = Encoder::new();
        enc.put_u64(5); // version, not the sentinel
        enc.put_u32(0);
        assert_eq!(LegacyFormat::sniff(&enc.into_vec()).unwrap(), LegacyFormat::OldPlain);
    }

    #[test]
    fn decode_legacy_sentinel_variant_round_trips() {
        let mut store = SessionMapStore::new();
        let inst_a = EntityInst::new(EntityName::client(1), "127.0.0.1:6801".parse().unwrap());
        let inst_b = EntityInst::new(EntityName::client(2), "127.0.0.1:6802".parse().unwrap());

        let mut records = Encoder::new();
        SessionInfo::new(inst_a).encode_legacy_body(&mut records);
        SessionInfo::new(inst_b).encode_legacy_body(&mut records);
        let records_bytes = records.into_vec();

        let mut frame_body = Encoder::new();
        frame_body.put_u64(3); // version
        frame_body.put_bytes_raw(&records_bytes);

        let mut outer = Encoder::new();
        outer.put_u64(LEGACY_SENTINEL);
        outer.encode_frame(LEGACY_SENTINEL_STRUCT_V, LEGACY_SENTINEL_COMPAT_V, |e| {
            e.put_bytes_raw(&frame_body.into_vec());
        });

        store.decode_legacy(&outer.into_vec(), 1_000).unwrap();
        assert_eq!(store.version, 3);
        assert_eq!(store.sessions.len(), 2);
        assert_eq!(store.sessions[&inst_a.name].last_cap_renew, 1_000);
        assert_eq!(store.sessions[&inst_a.name].state, SessionState::Open);
    }

    #[test]
    fn decode_legacy_old_variant_overwrites_duplicate_name_in_place() {
        let mut store = SessionMapStore::new();
        let name = EntityName::client(9);
        let inst_first = EntityInst::new(name, "127.0.0.1:6801".parse().unwrap());
        let inst_second = EntityInst::new(name, "127.0.0.1:9999".parse().unwrap());

        let mut records = Encoder::new();
        SessionInfo::new(inst_first).encode_legacy_body(&mut records);
        SessionInfo::new(inst_second).encode_legacy_body(&mut records);

        let mut outer = Encoder::new();
        outer.put_u64(5); // version
        outer.put_u32(999); // meaningless upper bound
        outer.put_bytes_raw(&records.into_vec());

        store.decode_legacy(&outer.into_vec(), 2_000).unwrap();
        assert_eq!(store.version, 5);
        assert_eq!(store.sessions.len(), 1, "duplicate name must not create a second session");
        assert_eq!(
            store.sessions[&name].info.inst.unwrap().addr,
            inst_second.addr,
            "later record must win"
        );
    }

    #[test]
    fn decode_legacy_empty_bytes_yields_version_zero() {
        let mut store = SessionMapStore::new();
        store.decode_legacy(&[], 0).unwrap();
        assert_eq!(store.version, 0);
        assert!(store.sessions.is_empty());
    }

    /// Spec §8's round-trip property: `decode(encode(M)) == M`, exercised
    /// across [`SessionMapStore::generate_test_instances`]'s fixtures
    /// (empty, one session, several sessions) rather than a single example.
    #[test]
    fn generated_instances_round_trip_through_the_modern_codec() {
        let mut instances = Vec::new();
        SessionMapStore::generate_test_instances(&mut instances);
        assert!(instances.len() >= 3, "fixture set must cover several shapes");

        for original in instances {
            let mut header_enc = Encoder::new();
            original.encode_header(&mut header_enc);
            let header_bytes = header_enc.into_vec();

            let mut entries = Vec::new();
            for (name, session) in &original.sessions {
                let mut enc = Encoder::new();
                session.info.encode(&mut enc);
                entries.push((name.to_key_string(), enc.into_vec()));
            }

            let mut decoded = SessionMapStore::new();
            decoded
                .decode_header(&mut Decoder::new(&header_bytes))
                .unwrap();
            decoded.decode_values(&entries).unwrap();

            assert_eq!(decoded.version, original.version);
            assert_eq!(decoded.sessions.len(), original.sessions.len());
            for (name, session) in &original.sessions {
                assert_eq!(decoded.sessions[name].info, session.info);
            }
        }
    }

    #[test]
    fn display_dumps_one_line_per_session_sorted_by_name() {
        let mut store = SessionMapStore::new();
        for i in [2u64, 1u64] {
            let inst = EntityInst::new(EntityName::client(i), "127.0.0.1:6801".parse().unwrap());
            let mut session = Session::new(SessionInfo::new(inst));
            session.state = SessionState::Open;
            store.sessions.insert(inst.name, session);
        }
        let dumped = store.to_string();
        let lines: Vec<&str> = dumped.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("client.1 "));
        assert!(lines[1].starts_with("client.2 "));
    }
}
