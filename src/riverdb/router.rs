use std::sync::Arc;

use crate::riverdb::backend_conn::BackendConnection;
use crate::riverdb::classifier::Classification;
use crate::riverdb::pool::ConnectionPool;

/// Stateless routing between the master and replica pools. Holds no
/// per-connection state of its own; every EventLoop thread shares the same
/// Router instance behind an Arc.
pub struct Router {
    master: Arc<dyn ConnectionPool>,
    replica: Arc<dyn ConnectionPool>,
}

impl Router {
    pub fn new(master: Arc<dyn ConnectionPool>, replica: Arc<dyn ConnectionPool>) -> Self {
        Router { master, replica }
    }

    /// Picks and acquires a connection for the given classification. Read
    /// goes to the replica pool; Write and Unknown stay on master, since
    /// routing an ambiguous statement to a replica risks losing
    /// read-your-writes consistency.
    pub fn pick(&self, classification: Classification) -> Option<Arc<BackendConnection>> {
        match classification {
            Classification::Read => self.replica.acquire(),
            Classification::Write | Classification::Unknown => self.master.acquire(),
        }
    }

    /// Returns a connection to whichever pool it came from. The caller must
    /// pass back the same classification used to pick() it.
    pub fn release(&self, classification: Classification, conn: Arc<BackendConnection>) {
        match classification {
            Classification::Read => self.replica.release(conn),
            Classification::Write | Classification::Unknown => self.master.release(conn),
        }
    }

    pub fn master(&self) -> &Arc<dyn ConnectionPool> {
        &self.master
    }

    pub fn replica(&self) -> &Arc<dyn ConnectionPool> {
        &self.replica
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::riverdb::pool::ScanCasPool;
    use mio::net::TcpStream;
    use std::net::TcpListener as StdTcpListener;

    fn make_conn() -> Arc<BackendConnection> {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        std::mem::forget(client);
        Arc::new(BackendConnection::new(TcpStream::from_std(server), addr))
    }

    #[test]
    fn read_routes_to_replica() {
        let master: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
        let replica: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
        replica.offer(make_conn());
        let router = Router::new(master.clone(), replica.clone());

        let conn = router.pick(Classification::Read).unwrap();
        assert_eq!(master.size(), 0);
        assert_eq!(replica.size(), 1);
        router.release(Classification::Read, conn);
    }

    #[test]
    fn write_and_unknown_route_to_master() {
        let master: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
        let replica: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
        master.offer(make_conn());
        master.offer(make_conn());
        let router = Router::new(master.clone(), replica.clone());

        let a = router.pick(Classification::Write).unwrap();
        let b = router.pick(Classification::Unknown).unwrap();
        assert!(router.pick(Classification::Write).is_none());
        router.release(Classification::Write, a);
        router.release(Classification::Unknown, b);
    }
}
