//! HTTP and hashing helpers.

use crate::packaging::error::{Error, ErrorExt, Result};
use sha2::Digest as _;
use std::path::Path;

/// Downloads a file from a URL.
///
/// Returns the body as bytes. Non-success status codes are errors.
pub async fn download(client: &reqwest::Client, url: &url::Url) -> Result<Vec<u8>> {
    log::info!("Downloading {}", url);

    let response = client
        .get(url.clone())
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::GenericError(format!("Download failed: {}", e)))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::GenericError(format!("Failed to read response: {}", e)))?;

    Ok(bytes.to_vec())
}

/// SHA-256 of a file, hex encoded.
///
/// Hashing runs on the blocking pool.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path)
        .await
        .fs_context("reading file for checksum", path)?;

    tokio::task::spawn_blocking(move || {
        let mut hasher = sha2::Sha256::new();
        hasher.update(&data);
        hex::encode(hasher.finalize())
    })
    .await
    .map_err(|e| Error::GenericError(format!("Checksum task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "abc").unwrap();
        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
