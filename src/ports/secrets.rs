//! Secret store port. The core
//! never reads raw key material itself; it asks this port for signing
//! material and API credentials.

use async_trait::async_trait;
use secrecy::SecretString;

#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: SecretString,
    pub passphrase: SecretString,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_signer_private_key(&self) -> anyhow::Result<SecretString>;
    async fn get_api_credentials(&self) -> anyhow::Result<ApiCredentials>;
}
