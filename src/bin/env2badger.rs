//! `env2badger` — seeds the local secret store from environment variables,
//! the one-time bootstrapper that runs before `pm_grid_bot` starts.
//!
//! Reads `PM_GRID_API_KEY`/`PM_GRID_API_SECRET`/`PM_GRID_API_PASSPHRASE` and
//! `PM_GRID_PRIVATE_KEY` (falling back to a `.env` file the way
//! `ZerodhaConfig::load_config`'s secrets-manager-then-.env fallback does)
//! and writes them to `PM_GRID_SECRET_STORE_PATH` (default
//! `./data/secrets/credentials.json`) via the same atomic
//! temp-file-then-rename `FileStore` the snapshot layer uses.
//!
//! Exit code 0 on success, 1 on any fatal condition; errors go to stderr.

use std::process::ExitCode;

use serde::{Deserialize, Serialize};

use pm_grid_core::ports::persistence::FileStore;

#[derive(Debug, Serialize, Deserialize, Default)]
struct SecretBundle {
    api_key: Option<String>,
    api_secret: Option<String>,
    api_passphrase: Option<String>,
    signer_private_key: Option<String>,
}

fn store_path() -> String {
    std::env::var("PM_GRID_SECRET_STORE_PATH").unwrap_or_else(|_| "./data/secrets".to_string())
}

fn store() -> FileStore {
    FileStore::new(&store_path(), "secrets", "default", "credentials")
}

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let bundle = SecretBundle {
        api_key: std::env::var("PM_GRID_API_KEY").ok(),
        api_secret: std::env::var("PM_GRID_API_SECRET").ok(),
        api_passphrase: std::env::var("PM_GRID_API_PASSPHRASE").ok(),
        signer_private_key: std::env::var("PM_GRID_PRIVATE_KEY").ok(),
    };

    if bundle.api_key.is_none() && bundle.signer_private_key.is_none() {
        anyhow::bail!(
            "nothing to seed: set at least one of PM_GRID_API_KEY or PM_GRID_PRIVATE_KEY"
        );
    }

    store().save(&bundle).await.map_err(|e| anyhow::anyhow!("failed to persist secret bundle: {e}"))?;
    eprintln!("seeded {} with {} field(s)", store_path(), [
        bundle.api_key.is_some(),
        bundle.api_secret.is_some(),
        bundle.api_passphrase.is_some(),
        bundle.signer_private_key.is_some(),
    ].iter().filter(|set| **set).count());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("env2badger: {e}");
            ExitCode::FAILURE
        }
    }
}
