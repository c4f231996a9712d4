use pagetree::config::{ConfigError, StorageEnvironmentOptions};
use pagetree::storage::{PageReader, StorageEnvironment};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagetree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let options = match StorageEnvironmentOptions::from_env() {
        Ok(options) if options.path.is_some() => options,
        Ok(_) => {
            let e = ConfigError::MissingEnvVar("PAGETREE_PATH".to_string());
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let env = match StorageEnvironment::open(options) {
        Ok(env) => env,
        Err(e) => {
            tracing::error!("Failed to open environment: {e}");
            std::process::exit(1);
        }
    };

    let tx = env.open_read_transaction();
    let names = match tx.tree_names() {
        Ok(names) => names,
        Err(e) => {
            tracing::error!("Failed to read the tree catalog: {e}");
            std::process::exit(1);
        }
    };

    for name in names {
        match tx.open_tree(&name).and_then(|tree| tree.state(&tx)) {
            Ok(state) => tracing::info!(
                "tree {name:?}: {} entries, depth {}, {} pages ({} branch, {} leaf, {} overflow)",
                state.entry_count,
                state.depth,
                state.page_count(),
                state.branch_pages,
                state.leaf_pages,
                state.overflow_pages
            ),
            Err(e) => tracing::warn!("tree {name:?}: {e}"),
        }
    }
    drop(tx);

    let stats = env.stats();
    tracing::info!(
        "commit {}: {} pages, {} free, {} free-list pages",
        stats.txn_id,
        stats.total_pages,
        stats.free_pages,
        stats.freelist_pages
    );
}
