use std::sync::Arc;

use crate::riverdb::backend_conn::BackendConnection;

mod ring;
mod scan_cas;

pub use ring::RingPool;
pub use scan_cas::ScanCasPool;

/// Contract shared by the two interchangeable lock-free pool
/// implementations (ScanCasPool, RingPool). A bounded container of
/// BackendConnection slots with capacity fixed at construction; size is
/// always in [0, capacity] and every stored connection is Idle or Busy.
pub trait ConnectionPool: Send + Sync {
    /// Claims an Idle connection, transitioning it to Busy. Returns None
    /// after a full sweep finds nothing claimable, which can happen even
    /// with empty slots present if the pool was concurrently drained.
    fn acquire(&self) -> Option<Arc<BackendConnection>>;

    /// Returns a previously acquired connection (Busy->Idle) to the pool.
    fn release(&self, conn: Arc<BackendConnection>);

    /// Installs a freshly created Idle connection into the pool. False if
    /// every slot was occupied.
    fn offer(&self, conn: Arc<BackendConnection>) -> bool;

    /// Removes a specific connection from the pool, e.g. one the Janitor
    /// just destroyed. False if it wasn't present.
    fn remove(&self, conn: &Arc<BackendConnection>) -> bool;

    fn size(&self) -> usize;

    fn capacity(&self) -> usize;
}
