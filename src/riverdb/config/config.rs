use std::mem::MaybeUninit;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::info;

use crate::riverdb::common::{Error, Result};
use crate::riverdb::config::enums::PoolVariant;
use crate::riverdb::config::load;

/// How often the background clock thread advances coarse_monotonic_now().
/// Granular enough for BackendConnection age checks, cheap enough to never
/// show up in a profile.
pub const COARSE_CLOCK_GRANULARITY_SECONDS: u64 = 1;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
    pub listen_port: u16,
    pub pool_type: PoolVariant,
    pub backend_host: String,
    pub backend_port: u16,
    /// distinct replica endpoint; defaults to backend_host/backend_port
    /// when absent, per the master/replica redesign decision.
    pub replica_host: Option<String>,
    pub replica_port: Option<u16>,
    pub worker_count: usize,
    pub buffer_pool_size: u32,
    pub buffer_size: u32,
    pub connection_pool_size: u32,
    pub max_idle_secs: u32,
    pub janitor_interval_secs: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_path: None,
            listen_port: default_listen_port(),
            pool_type: PoolVariant::Cas,
            backend_host: default_backend_host(),
            backend_port: default_backend_port(),
            replica_host: None,
            replica_port: None,
            worker_count: num_cpus::get(),
            buffer_pool_size: default_buffer_pool_size(),
            buffer_size: default_buffer_size(),
            connection_pool_size: default_connection_pool_size(),
            max_idle_secs: default_max_idle_secs(),
            janitor_interval_secs: default_janitor_interval_secs(),
        }
    }
}

const fn default_listen_port() -> u16 {
    3307
}
fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_backend_port() -> u16 {
    5432
}
const fn default_buffer_pool_size() -> u32 {
    16384
}
const fn default_buffer_size() -> u32 {
    8192
}
const fn default_connection_pool_size() -> u32 {
    128
}
const fn default_max_idle_secs() -> u32 {
    300
}
const fn default_janitor_interval_secs() -> u32 {
    30
}

static mut SETTINGS: MaybeUninit<Settings> = MaybeUninit::uninit();

pub fn config() -> &'static Settings {
    // SAFETY: Settings::load() runs once, before any other thread is spawned.
    unsafe { &*SETTINGS.as_ptr() }
}

impl Settings {
    /// Replica accessors fall back to the master endpoint when no distinct
    /// replica was configured (redesign decision 3.3).
    pub fn replica_host(&self) -> &str {
        self.replica_host.as_deref().unwrap_or(&self.backend_host)
    }

    pub fn replica_port(&self) -> u16 {
        self.replica_port.unwrap_or(self.backend_port)
    }

    /// Builds the global Settings from an optional riverdb.yaml overlaid
    /// with CLI positional arguments (listen_port, pool_type, backend_host,
    /// backend_port), in that precedence order: CLI wins.
    pub fn load() -> Result<&'static Settings> {
        let mut settings = match load::load_config_file("riverdb.yaml")? {
            Some(s) => s,
            None => Settings::default(),
        };

        let args: Vec<String> = std::env::args().skip(1).collect();
        if let Some(arg) = args.get(0) {
            settings.listen_port = arg
                .parse()
                .map_err(|_| Error::new(format!("invalid listen_port argument: {}", arg)))?;
        }
        if let Some(arg) = args.get(1) {
            settings.pool_type = PoolVariant::parse(arg);
        }
        if let Some(arg) = args.get(2) {
            settings.backend_host = arg.clone();
        }
        if let Some(arg) = args.get(3) {
            settings.backend_port = arg
                .parse()
                .map_err(|_| Error::new(format!("invalid backend_port argument: {}", arg)))?;
        }

        unsafe {
            SETTINGS = MaybeUninit::new(settings);
        }

        let s = config();
        info!(
            listen_port = s.listen_port,
            pool_type = %s.pool_type,
            worker_count = s.worker_count,
            backend_host = %s.backend_host,
            backend_port = s.backend_port,
            replica_host = %s.replica_host(),
            replica_port = s.replica_port(),
            "configuration loaded"
        );
        Ok(s)
    }
}
