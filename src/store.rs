//! Record store contract consumed by the coordinator (count + paginated find)
//! and by workers (find-by-id), plus an in-memory implementation.

pub mod memory;
pub mod query;

use anyhow::Result;
use futures::future::BoxFuture;

pub use memory::{MemoryRecord, MemoryStore};
pub use query::{FindQuery, HydrateOptions, ScanDescriptor};

/// Identifier of one row within a scan pass.
pub type UnitId = u64;

/// Anything the store returns must expose its stable identifier so the
/// coordinator can keep ids only.
pub trait Identified {
    fn unit_id(&self) -> UnitId;
}

/// Narrow query contract the core relies on. The store implementation is
/// selected statically by the caller; the core never resolves it by name.
pub trait RecordStore: Send + Sync + 'static {
    type Record: Identified + Send + 'static;

    /// Number of rows matching `conditions` (`None` matches every row).
    fn count<'a>(&'a self, conditions: Option<&'a str>) -> BoxFuture<'a, Result<u64>>;

    /// One page of matching rows, in the descriptor's ordering.
    fn find<'a>(&'a self, query: &'a FindQuery) -> BoxFuture<'a, Result<Vec<Self::Record>>>;

    /// Full record for a single id.
    fn find_by_id<'a>(
        &'a self,
        id: UnitId,
        options: &'a HydrateOptions,
    ) -> BoxFuture<'a, Result<Self::Record>>;
}
