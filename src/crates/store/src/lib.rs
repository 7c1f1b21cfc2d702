//! store: durable state for manta sessions.
//!
//! One trait ([`KvStore`]) over the Redis-like backend, two implementations
//! (in-memory for tests and single-node dev, Redis for deployment), the
//! export/retention service, and the adapter that parks interrupt snapshots
//! under `run:<run_id>` keys.

pub mod error;
pub mod export;
pub mod memory;
pub mod redis;
pub mod snapshots;
pub mod traits;
pub mod types;

pub use self::redis::RedisStore;
pub use error::{Result, StoreError};
pub use export::ExportService;
pub use memory::MemoryStore;
pub use snapshots::KvSnapshotStore;
pub use traits::KvStore;
pub use types::{keys, ExportStatus, FileHandle, SessionMeta};
