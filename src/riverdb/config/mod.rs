mod config;
mod enums;
mod load;

pub use config::{config, Settings, COARSE_CLOCK_GRANULARITY_SECONDS};
pub use enums::PoolVariant;
pub use load::{find_config_file, load_config_file, replace_env_vars};
