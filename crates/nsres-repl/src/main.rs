//! nsres REPL entry point.
//!
//! ```bash
//! RUST_LOG=nsres_kernel=debug cargo run -p nsres-repl
//! ```

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> Result<()> {
    // RUST_LOG controls verbosity
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    nsres_repl::run()
}
