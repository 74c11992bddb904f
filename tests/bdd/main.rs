// BDD runner for the workflow feature files

mod steps;

use autoflow_test_utils::bdd::run_features;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .init();

    run_features(concat!(env!("CARGO_MANIFEST_DIR"), "/features")).await;
}
