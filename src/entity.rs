//! Entity identifiers: the primary key and network identity of a session.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::DecodeError;

/// The kind half of an [`EntityName`].
///
/// Mirrors the small, closed set of principal kinds a cluster map
/// distinguishes between; the session map itself only ever sees `Client`
/// sessions in practice, but the type is kept general so `EntityName`
/// round-trips whatever kind string an encoded key actually carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Client,
    Mds,
    Osd,
    Mon,
    Mgr,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Mds => "mds",
            Self::Osd => "osd",
            Self::Mon => "mon",
            Self::Mgr => "mgr",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "mds" => Ok(Self::Mds),
            "osd" => Ok(Self::Osd),
            "mon" => Ok(Self::Mon),
            "mgr" => Ok(Self::Mgr),
            other => Err(DecodeError::MalformedKey(format!(
                "unknown entity kind `{other}`"
            ))),
        }
    }
}

/// A stable, parseable identifier `(kind, numeric id)` — e.g. `client.4567`.
///
/// This is the session map's primary key (spec §3, invariant I1) and never
/// changes for the lifetime of a [`crate::session::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityName {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityName {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn client(id: u64) -> Self {
        Self::new(EntityKind::Client, id)
    }

    /// The textual form used as an OMAP key: `"client.4567"`.
    pub fn to_key_string(self) -> String {
        format!("{}.{}", self.kind, self.id)
    }

    /// The default `entity_id` for this name, per spec §4.6's
    /// human-name derivation: an `entity_id` equal to the numeric id string
    /// carries no extra information and is suppressed from `human_name`.
    pub fn default_entity_id(self) -> String {
        self.id.to_string()
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.id)
    }
}

impl FromStr for EntityName {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind_str, id_str) = s
            .split_once('.')
            .ok_or_else(|| DecodeError::MalformedKey(s.to_string()))?;
        let kind: EntityKind = kind_str.parse()?;
        let id: u64 = id_str
            .parse()
            .map_err(|_| DecodeError::MalformedKey(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

/// `(EntityName, network address)`. The address is mutable across
/// reconnects; the name is the stable part (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityInst {
    pub name: EntityName,
    pub addr: SocketAddr,
}

impl EntityInst {
    pub fn new(name: EntityName, addr: SocketAddr) -> Self {
        Self { name, addr }
    }
}

impl fmt::Display for EntityInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.addr)
    }
}
