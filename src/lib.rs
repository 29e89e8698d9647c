//! sessionmap — the authoritative, durable table of client sessions held by
//! one metadata-server rank.
//!
//! A [`session_map::SessionMap`] is the live, rank-owned index: it tracks
//! dirty/tombstoned sessions between saves, maintains the
//! projected/committing/committed version lineage, and drives its own
//! load/save state machines against an [`objecter::Objecter`] (the object
//! store client). Everything on-disk is framed with the versioned binary
//! preamble in [`codec`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::sync::{oneshot, Mutex};
//!
//! use sessionmap::clock::SystemClock;
//! use sessionmap::config::SessionMapConfig;
//! use sessionmap::objecter::fake::FakeObjecter;
//! use sessionmap::session_map::{persistence, SessionMap};
//!
//! # async fn example() {
//! let config = SessionMapConfig::new(1024, Arc::new(SystemClock)).unwrap();
//! let map = Arc::new(Mutex::new(SessionMap::new(config)));
//! let objecter: Arc<dyn sessionmap::objecter::Objecter> = Arc::new(FakeObjecter::new());
//! let (tx, rx) = oneshot::channel();
//! persistence::load(&map, objecter.as_ref(), "mds0_sessionmap", tx)
//!     .await
//!     .unwrap();
//! rx.await.unwrap();
//! # }
//! ```

/// Clock abstraction injected at construction (spec §9).
pub mod clock;
/// Versioned binary framing primitives shared by every on-disk record.
pub mod codec;
/// Layered runtime configuration (`sessionmap_keys_per_op`, clock).
pub mod config;
/// Entity identifiers: `EntityName`, `EntityKind`, `EntityInst`.
pub mod entity;
/// Unified error types used across crate modules.
pub mod error;
/// The object-store client surface this crate consumes, plus a fake double.
pub mod objecter;
/// One client's negotiated state: capability bookkeeping and naming.
pub mod session;
/// Persisted per-session payload (`SessionInfo`) and its codec.
pub mod session_info;
/// The live, rank-owned `SessionMap` and its load/save state machines.
pub mod session_map;
/// Pure in-memory index plus codec for the persisted representation.
pub mod store;
