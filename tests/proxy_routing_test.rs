mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use riverdb::buffer_pool::DirectBufferPool;
use riverdb::factory::BackendFactory;
use riverdb::pool::{ConnectionPool, ScanCasPool};
use riverdb::event_loop_group::EventLoopGroup;
use riverdb::acceptor::Acceptor;
use riverdb::router::Router;

fn send_and_read(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).expect("connect to proxy");
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.write_all(request).unwrap();

    let mut buf = [0u8; 4096];
    let n = client.read(&mut buf).expect("read proxy response");
    buf[..n].to_vec()
}

/// End-to-end: a client SELECT is routed to the replica backend, a client
/// INSERT is routed to the master backend, distinguished by the tag each
/// fake backend prepends to its echo.
#[test]
fn select_routes_to_replica_and_insert_routes_to_master() {
    let master_addr = common::spawn_tagged_echo_backend(b"M:");
    let replica_addr = common::spawn_tagged_echo_backend(b"R:");

    let buffer_pool = Arc::new(DirectBufferPool::new(8, 4096));

    let master_factory = BackendFactory::new(master_addr.ip().to_string(), master_addr.port());
    let replica_factory = BackendFactory::new(replica_addr.ip().to_string(), replica_addr.port());

    let master_pool: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
    let replica_pool: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(2));
    for _ in 0..2 {
        master_pool.offer(Arc::new(master_factory.connect().expect("connect master")));
        replica_pool.offer(Arc::new(replica_factory.connect().expect("connect replica")));
    }

    let router = Arc::new(Router::new(master_pool, replica_pool));

    let group = EventLoopGroup::new(2, buffer_pool, router).expect("build event loop group");
    group.start().expect("start event loop group");

    let acceptor = Arc::new(Acceptor::new(0, group.clone()).expect("bind acceptor"));
    let proxy_addr = acceptor.local_addr().expect("proxy local_addr");
    {
        let acceptor = acceptor.clone();
        std::thread::spawn(move || {
            let _ = acceptor.run();
        });
    }

    let select_reply = send_and_read(proxy_addr, b"SELECT 1");
    assert!(select_reply.starts_with(b"R:SELECT 1"), "got {:?}", String::from_utf8_lossy(&select_reply));

    let insert_reply = send_and_read(proxy_addr, b"INSERT INTO t VALUES (1)");
    assert!(insert_reply.starts_with(b"M:INSERT INTO t VALUES (1)"), "got {:?}", String::from_utf8_lossy(&insert_reply));

    group.shutdown();
}

/// Several sequential clients against a single-connection pool: each client
/// gets its backend connection handed back to it in turn rather than the
/// proxy deadlocking or erroring once the one connection is busy.
#[test]
fn sequential_clients_share_a_single_pooled_connection() {
    let master_addr = common::spawn_tagged_echo_backend(b"M:");

    let buffer_pool = Arc::new(DirectBufferPool::new(4, 4096));
    let master_factory = BackendFactory::new(master_addr.ip().to_string(), master_addr.port());
    let master_pool: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(1));
    master_pool.offer(Arc::new(master_factory.connect().expect("connect master")));
    // Never offered into: this test only sends writes, so the replica pool
    // is never acquired from, but Router still needs one to route against.
    let replica_pool: Arc<dyn ConnectionPool> = Arc::new(ScanCasPool::new(1));

    let router = Arc::new(Router::new(master_pool, replica_pool));
    let group = EventLoopGroup::new(1, buffer_pool, router).expect("build event loop group");
    group.start().expect("start event loop group");

    let acceptor = Arc::new(Acceptor::new(0, group.clone()).expect("bind acceptor"));
    let proxy_addr = acceptor.local_addr().expect("proxy local_addr");
    {
        let acceptor = acceptor.clone();
        std::thread::spawn(move || {
            let _ = acceptor.run();
        });
    }

    for i in 0..5 {
        let reply = send_and_read(proxy_addr, format!("UPDATE t SET x = {}", i).as_bytes());
        assert!(reply.starts_with(b"M:UPDATE"), "got {:?}", String::from_utf8_lossy(&reply));
    }

    group.shutdown();
}
