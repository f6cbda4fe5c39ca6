use tracing_subscriber::EnvFilter;

/// Environment variables consulted for a filter override, first hit wins.
const FILTER_VARS: [&str; 2] = ["STAMPEDE_LOG", "RUST_LOG"];

pub fn init_logging(verbose: bool) {
    let default_directive = if verbose {
        "stampede=debug,info"
    } else {
        "info"
    };
    let filter = FILTER_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive));

    // An embedder (or a repeated init) may already have installed a
    // subscriber; keep whatever is in place.
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
    );
}
