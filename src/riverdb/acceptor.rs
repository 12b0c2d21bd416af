use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::riverdb::common::Result;
use crate::riverdb::event_loop_group::EventLoopGroup;

/// Binds a blocking listen socket (accept() is the only intentionally
/// blocking call anywhere in the system) and loops forever, dispatching
/// each accepted socket to the EventLoopGroup.
pub struct Acceptor {
    listener: std::net::TcpListener,
    group: Arc<EventLoopGroup>,
}

impl Acceptor {
    pub fn new(listen_port: u16, group: Arc<EventLoopGroup>) -> Result<Self> {
        let addr: SocketAddr = format!("0.0.0.0:{}", listen_port).parse()?;
        let listener = std::net::TcpListener::bind(addr)?;
        Ok(Acceptor { listener, group })
    }

    /// The bound address, including the OS-assigned port when constructed
    /// with `listen_port: 0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Returns only on a bind/accept error; there is no
    /// shutdown() hook on Acceptor itself since accept() cannot be
    /// interrupted or woken without its own multiplexer registration. A
    /// clean shutdown is instead driven independently of this call ever
    /// returning: riverdb::run installs a signal handler that runs the
    /// janitor/event-loop teardown sequence and exits the process directly
    /// (see riverdb::run).
    pub fn run(&self) -> Result<()> {
        loop {
            let (stream, peer_addr) = self.listener.accept()?;
            stream.set_nonblocking(true)?;
            let mio_stream = mio::net::TcpStream::from_std(stream);
            if let Err(e) = self.group.dispatch(mio_stream) {
                warn!(peer = %peer_addr, error = %e, "failed to dispatch accepted connection");
                continue;
            }
            info!(peer = %peer_addr, "accepted connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::riverdb::buffer_pool::DirectBufferPool;
    use crate::riverdb::pool::ScanCasPool;
    use crate::riverdb::router::Router;

    #[test]
    fn binds_the_requested_port() {
        let buffer_pool = Arc::new(DirectBufferPool::new(4, 256));
        let master = Arc::new(ScanCasPool::new(1));
        let replica = Arc::new(ScanCasPool::new(1));
        let router = Arc::new(Router::new(master, replica));
        let group = EventLoopGroup::new(1, buffer_pool, router).unwrap();

        let acceptor = Acceptor::new(0, group).unwrap();
        assert!(acceptor.listener.local_addr().unwrap().port() > 0);
    }
}
