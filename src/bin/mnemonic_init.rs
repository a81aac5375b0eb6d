//! `mnemonic_init` — derives the signer's private key from a BIP39
//! mnemonic and merges it into the same credential store `env2badger`
//! seeds.
//!
//! The mnemonic is read from `PM_GRID_MNEMONIC`, or interactively from
//! stdin if unset, never from argv (would leak into shell history/process
//! listings). Derivation path defaults to `m/44'/60'/0'/0/0` (index 0),
//! overridable via `PM_GRID_MNEMONIC_INDEX`, matching the reference implementation's
//! `alloy::signers::local` stack (`polymarket/executor.rs::init_clob_client`
//! uses the same `LocalSigner<SigningKey>`, just constructed from a raw
//! private key instead of a mnemonic).

use std::io::Read;
use std::process::ExitCode;

use alloy::signers::local::{LocalSigner, MnemonicBuilder};
use alloy::signers::local::coins_bip39::English;
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

fn read_mnemonic() -> anyhow::Result<String> {
    if let Ok(m) = std::env::var("PM_GRID_MNEMONIC") {
        return Ok(m);
    }
    eprint!("mnemonic phrase: ");
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let phrase = input.trim().to_string();
    if phrase.is_empty() {
        anyhow::bail!("no mnemonic provided (set PM_GRID_MNEMONIC or pipe it on stdin)");
    }
    Ok(phrase)
}

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let phrase = read_mnemonic()?;
    let index: u32 = std::env::var("PM_GRID_MNEMONIC_INDEX")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let signer: LocalSigner<_> = MnemonicBuilder::<English>::default()
        .phrase(phrase.as_str())
        .index(index)?
        .build()?;

    let private_key_hex = format!("0x{}", hex::encode(signer.to_bytes()));

    let mut bundle: SecretBundle = store().load().await.unwrap_or_default();
    bundle.signer_private_key = Some(private_key_hex);
    store().save(&bundle).await.map_err(|e| anyhow::anyhow!("failed to persist derived key: {e}"))?;

    eprintln!("derived signer address {} at index {index}, merged into {}", signer.address(), store_path());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mnemonic_init: {e}");
            ExitCode::FAILURE
        }
    }
}
