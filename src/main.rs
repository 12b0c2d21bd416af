use tracing::{info_span, Level};

use riverdb::config::Settings;
use riverdb::{init_settings, init_tracing, run};

fn main() {
    init_tracing(Level::INFO);

    let _span = info_span!("startup").entered();

    let conf: &'static Settings = init_settings().expect("could not load configuration");

    if let Err(e) = run(conf) {
        tracing::error!(error = %e, "riverdb exited with an error");
        std::process::exit(1);
    }
}
