//! Section-scoped cache engine.
//!
//! Three tiers sit behind one per-request [`CacheSession`]:
//!
//! - **Vars**: small named values keyed by `(name, section, sid, lang)`
//! - **Objects**: hydrated domain objects keyed by `(type, id, sid, lang)`
//! - **Artifacts**: rendered documents keyed by a request fingerprint and
//!   related to the entities they were built from
//!
//! Vars and objects live in one SQLite file per scope with an optional
//! in-process memory tier in front. Artifacts live in a shared metadata
//! database plus one file per document.
//!
//! ## Configuration
//!
//! Cache behaviour is controlled via `sectio.toml`:
//!
//! ```toml
//! [cache]
//! root = "cache"
//! memory_enabled = true
//! memory_limit = 2048
//! object_budget_ms = 3000
//!
//! [view]
//! enabled = true
//! bypass_authenticated = true
//! ```

mod artifacts;
mod codec;
mod config;
pub mod deps;
mod driver;
mod engine;
mod fingerprint;
mod gc;
mod host;
mod invalidation;
mod keys;
mod lock;
mod memory;
mod objects;
mod registry;
mod request;
mod session;
mod statement;
mod store;
mod trees;
mod vars;
mod views;

pub use artifacts::{
    ArtifactCache, ArtifactDocument, ArtifactError, ConfigRef, sanitize_xml, strip_visitor_nodes,
};
pub use codec::{Codec, CodecError, Encoded};
pub use config::{CacheConfig, CodecConfig, ViewConfig};
pub use deps::DependencyTracker;
pub use driver::{Driver, DriverProbe};
pub use engine::CacheEngine;
pub use fingerprint::{Fingerprint, RESERVED_PARAMS};
pub use gc::{FileGc, GcReport};
pub use host::{
    Collaborators, HierarchyResolver, HostPageCache, NoopMessages, NoopPageCache, NoopResolver,
    ResolveError, SystemMessages,
};
pub use invalidation::{CATEGORY_TREE_ADMIN_VAR, CATEGORY_TREE_FRONT_VAR, CleanReport};
pub use keys::{NAMESPACE, VarKey};
pub use memory::{LruMemoryCache, MemoryCache, MemoryValue, NoopMemoryCache};
pub use objects::{AddObjOutcome, resolve_kinds};
pub use request::{RequestContext, RouteKind};
pub use session::CacheSession;
pub use store::{CacheStore, StoreError, scope_path};
pub use trees::CategoryTrees;
pub use vars::{VarLookup, is_falsy};
