//! `SessionInfo`: the persisted payload carried by each [`crate::session::Session`].

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{Decoder, Encoder};
use crate::entity::EntityInst;
use crate::error::DecodeError;

/// Current struct version written by this crate.
const SESSION_INFO_STRUCT_V: u8 = 2;
/// Oldest struct version this crate can still decode.
const SESSION_INFO_COMPAT_V: u8 = 1;

/// Inode number, as allocated by the MDS's inode allocator (an external
/// collaborator — the session map only tracks the numbers themselves).
pub type Ino = u64;

/// The persisted state of one client session (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionInfo {
    /// Identity and last-known network address.
    pub inst: Option<EntityInst>,
    /// Inode numbers pre-allocated to this client but not yet used.
    pub prealloc_inos: BTreeSet<Ino>,
    /// Inode numbers this client has actually used.
    pub used_inos: BTreeSet<Ino>,
    /// Request transaction ids this client has already completed, kept so a
    /// retransmitted request can be recognized as a duplicate.
    pub completed_requests: BTreeSet<u64>,
    /// Free-form client-supplied metadata (hostname, entity id, features, ...).
    pub client_metadata: BTreeMap<String, String>,
}

impl SessionInfo {
    pub fn new(inst: EntityInst) -> Self {
        Self {
            inst: Some(inst),
            ..Default::default()
        }
    }

    /// Encodes this session's payload as one versioned frame.
    pub fn encode(&self, enc: &mut Encoder) {
        enc.encode_frame(SESSION_INFO_STRUCT_V, SESSION_INFO_COMPAT_V, |e| {
            match self.inst {
                Some(inst) => {
                    e.put_u8(1);
                    e.put_str(&inst.name.to_string());
                    e.put_str(&inst.addr.to_string());
                }
                None => e.put_u8(0),
            }
            e.put_u32(self.prealloc_inos.len() as u32);
            for ino in &self.prealloc_inos {
                e.put_u64(*ino);
            }
            e.put_u32(self.used_inos.len() as u32);
            for ino in &self.used_inos {
                e.put_u64(*ino);
            }
            e.put_u32(self.completed_requests.len() as u32);
            for tid in &self.completed_requests {
                e.put_u64(*tid);
            }
            e.put_u32(self.client_metadata.len() as u32);
            for (k, v) in &self.client_metadata {
                e.put_str(k);
                e.put_str(v);
            }
        });
    }

    /// Decodes one versioned frame produced by [`Self::encode`].
    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let (_, mut body) = dec.decode_frame(SESSION_INFO_COMPAT_V)?;
        let has_inst = body.get_u8()?;
        let inst = if has_inst != 0 {
            let name = body.get_str()?.parse()?;
            let addr = body
                .get_str()?
                .parse()
                .map_err(|e| DecodeError::MalformedValue(format!("bad address: {e}")))?;
            Some(EntityInst::new(name, addr))
        } else {
            None
        };

        let prealloc_inos = read_ino_set(&mut body)?;
        let used_inos = read_ino_set(&mut body)?;

        let completed_count = body.get_u32()?;
        let mut completed_requests = BTreeSet::new();
        for _ in 0..completed_count {
            completed_requests.insert(body.get_u64()?);
        }

        let meta_count = body.get_u32()?;
        let mut client_metadata = BTreeMap::new();
        for _ in 0..meta_count {
            let k = body.get_str()?;
            let v = body.get_str()?;
            client_metadata.insert(k, v);
        }

        Ok(Self {
            inst,
            prealloc_inos,
            used_inos,
            completed_requests,
            client_metadata,
        })
    }

    /// Decodes a `SessionInfo` body that was written without its own frame
    /// preamble — the legacy "old format" described in spec §4.1, where a
    /// record is just the fields back to back with no surrounding
    /// `(struct_v, compat_v, len)` header.
    pub fn decode_legacy_body(dec: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        let has_inst = dec.get_u8()?;
        let inst = if has_inst != 0 {
            let name = dec.get_str()?.parse()?;
            let addr = dec
                .get_str()?
                .parse()
                .map_err(|e| DecodeError::MalformedValue(format!("bad address: {e}")))?;
            Some(EntityInst::new(name, addr))
        } else {
            None
        };
        let prealloc_inos = read_ino_set(dec)?;
        let used_inos = read_ino_set(dec)?;
        let completed_count = dec.get_u32()?;
        let mut completed_requests = BTreeSet::new();
        for _ in 0..completed_count {
            completed_requests.insert(dec.get_u64()?);
        }
        let meta_count = dec.get_u32()?;
        let mut client_metadata = BTreeMap::new();
        for _ in 0..meta_count {
            let k = dec.get_str()?;
            let v = dec.get_str()?;
            client_metadata.insert(k, v);
        }
        Ok(Self {
            inst,
            prealloc_inos,
            used_inos,
            completed_requests,
            client_metadata,
        })
    }

    /// Encodes this session's payload in the legacy bodyless-frame shape,
    /// used only by tests constructing legacy fixtures.
    #[cfg(test)]
    pub fn encode_legacy_body(&self, e: &mut Encoder) {
        match self.inst {
            Some(inst) => {
                e.put_u8(1);
                e.put_str(&inst.name.to_string());
                e.put_str(&inst.addr.to_string());
            }
            None => e.put_u8(0),
        }
        e.put_u32(self.prealloc_inos.len() as u32);
        for ino in &self.prealloc_inos {
            e.put_u64(*ino);
        }
        e.put_u32(self.used_inos.len() as u32);
        for ino in &self.used_inos {
            e.put_u64(*ino);
        }
        e.put_u32(self.completed_requests.len() as u32);
        for tid in &self.completed_requests {
            e.put_u64(*tid);
        }
        e.put_u32(self.client_metadata.len() as u32);
        for (k, v) in &self.client_metadata {
            e.put_str(k);
            e.put_str(v);
        }
    }
}

fn read_ino_set(dec: &mut Decoder<'_>) -> Result<BTreeSet<Ino>, DecodeError> {
    let count = dec.get_u32()?;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        set.insert(dec.get_u64()?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityName;

    fn sample() -> SessionInfo {
        let mut info = SessionInfo::new(EntityInst::new(
            EntityName::client(4567),
            "127.0.0.1:6801".parse().unwrap(),
        ));
        info.prealloc_inos.insert(100);
        info.prealloc_inos.insert(101);
        info.used_inos.insert(50);
        info.completed_requests.insert(7);
        info.client_metadata
            .insert("hostname".into(), "box1".into());
        info
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let info = sample();
        let mut enc = Encoder::new();
        info.encode(&mut enc);
        let bytes = enc.into_vec();
        let mut dec = Decoder::new(&bytes);
        let decoded = SessionInfo::decode(&mut dec).unwrap();
        assert_eq!(decoded, info);
        assert!(dec.is_empty());
    }

    #[test]
    fn legacy_body_round_trips_without_frame() {
        let info = sample();
        let mut enc = Encoder::new();
        info.encode_legacy_body(&mut enc);
        let bytes = enc.into_vec();
        let mut dec = Decoder::new(&bytes);
        let decoded = SessionInfo::decode_legacy_body(&mut dec).unwrap();
        assert_eq!(decoded, info);
    }
}
