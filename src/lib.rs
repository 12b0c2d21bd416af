pub mod riverdb;

pub use crate::riverdb::*;

use std::sync::{Arc, Mutex};

use tracing::{info_span, Level};
use tracing_subscriber::FmtSubscriber;

use crate::riverdb::acceptor::Acceptor;
use crate::riverdb::buffer_pool::DirectBufferPool;
use crate::riverdb::common::{coarse_clock_updater, Error, Result};
use crate::riverdb::config::{PoolVariant, Settings};
use crate::riverdb::event_loop_group::EventLoopGroup;
use crate::riverdb::factory::BackendFactory;
use crate::riverdb::janitor::Janitor;
use crate::riverdb::pool::{ConnectionPool, RingPool, ScanCasPool};
use crate::riverdb::router::Router;
use crate::riverdb::worker::init_workers;

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

/// Loads configuration: CLI positional arguments layered over an optional
/// riverdb.yaml. See riverdb::config::Settings::load for precedence.
pub fn init_settings() -> Result<&'static Settings> {
    Settings::load()
}

fn build_pool(capacity: u32, variant: PoolVariant) -> Arc<dyn ConnectionPool> {
    match variant {
        PoolVariant::Cas => Arc::new(ScanCasPool::new(capacity as usize)),
        PoolVariant::Ring => Arc::new(RingPool::new(capacity as usize)),
    }
}

/// The one-time teardown sequence: stop both janitors, then the event loop
/// group. Guarded by a Mutex<Option<_>> so it can be wired up to run from
/// either the signal handler or the normal post-accept-error path without
/// running twice, whichever gets there first.
type ShutdownState = Mutex<Option<(Janitor, Janitor, Arc<EventLoopGroup>)>>;

fn teardown(state: &ShutdownState) {
    let taken = state.lock().expect("shutdown state poisoned").take();
    if let Some((master_janitor, replica_janitor, group)) = taken {
        master_janitor.shutdown();
        replica_janitor.shutdown();
        group.shutdown();
        tracing::info!("riverdb shutdown complete");
    }
}

/// Builds every long-lived component (buffer pool, master/replica
/// connection pools + factories, janitors, event loop group, acceptor) and
/// runs the acceptor's blocking accept loop. Only returns on a bind/accept
/// failure, at which point it tears down the janitors and event loop group
/// before propagating the error.
pub fn run(conf: &'static Settings) -> Result<()> {
    let _span = info_span!("startup").entered();

    unsafe {
        init_workers(conf.worker_count as u32);
    }
    coarse_clock_updater();

    let buffer_pool = Arc::new(DirectBufferPool::new(conf.buffer_pool_size as usize, conf.buffer_size as usize));

    let master_factory = Arc::new(BackendFactory::new(conf.backend_host.clone(), conf.backend_port));
    let replica_factory = Arc::new(BackendFactory::new(conf.replica_host().to_string(), conf.replica_port()));

    let master_pool = build_pool(conf.connection_pool_size, conf.pool_type);
    let replica_pool = build_pool(conf.connection_pool_size, conf.pool_type);

    let router = Arc::new(Router::new(master_pool.clone(), replica_pool.clone()));

    let master_janitor = Janitor::spawn(
        "master",
        master_pool.clone(),
        master_factory.clone(),
        conf.max_idle_secs,
        conf.janitor_interval_secs,
    );
    let replica_janitor = Janitor::spawn(
        "replica",
        replica_pool.clone(),
        replica_factory.clone(),
        conf.max_idle_secs,
        conf.janitor_interval_secs,
    );

    let group = EventLoopGroup::new(conf.worker_count, buffer_pool.clone(), router.clone())?;
    group.start()?;

    let acceptor = Acceptor::new(conf.listen_port, group.clone())?;
    tracing::info!(
        listen_port = conf.listen_port,
        pool_type = %conf.pool_type,
        worker_count = conf.worker_count,
        backend_host = %conf.backend_host,
        backend_port = conf.backend_port,
        "riverdb listening"
    );

    let shutdown_state: Arc<ShutdownState> = Arc::new(Mutex::new(Some((master_janitor, replica_janitor, group))));

    // SIGINT/SIGTERM is the only other trigger for the teardown sequence;
    // accept() itself can't be interrupted, so the handler runs teardown
    // directly instead of waiting on acceptor.run() to return, then exits
    // with the clean-shutdown status code since that thread never will.
    let signal_state = shutdown_state.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        teardown(&signal_state);
        std::process::exit(0);
    })
    .map_err(|e| Error::new(e.to_string()))?;

    let result = acceptor.run();
    teardown(&shutdown_state);
    result
}
