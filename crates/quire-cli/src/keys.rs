//! Signing key file: the 32-byte secp256k1 secret as hex

use k256::ecdsa::SigningKey;
use miette::{Context, IntoDiagnostic, Result, miette};
use std::path::Path;
use tokio::io::AsyncWriteExt;

pub async fn load(path: &Path) -> Result<SigningKey> {
    let text = tokio::fs::read_to_string(path)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read key file {}", path.display()))?;
    let bytes = hex::decode(text.trim())
        .into_diagnostic()
        .wrap_err("Key file is not hex")?;
    SigningKey::from_slice(&bytes)
        .into_diagnostic()
        .wrap_err("Key file does not hold a secp256k1 secret key")
}

/// Write a fresh key to `path`, refusing to replace an existing one
///
/// On unix the file is created with mode 0600.
pub async fn generate(path: &Path) -> Result<SigningKey> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = match options.open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(miette!(
                help = "remove it first if you really mean to replace the repository key",
                "Key file {} already exists",
                path.display()
            ));
        }
        Err(e) => {
            return Err(e)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to create key file {}", path.display()));
        }
    };

    let key = SigningKey::random(&mut rand::rngs::OsRng);
    let mut text = hex::encode(key.to_bytes());
    text.push('\n');
    file.write_all(text.as_bytes()).await.into_diagnostic()?;
    file.sync_all().await.into_diagnostic()?;

    tracing::info!(path = %path.display(), "generated signing key");
    Ok(key)
}
