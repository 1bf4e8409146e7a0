//! Local-disk proof file storage.
//!
//! Keys follow `proofs/{year}/{month}/{day}/{wallet_prefix}/{uuid}.{ext}` —
//! a human-browsable layout that is generated here and never parsed back.

use std::path::PathBuf;

use anyhow::Context as _;
use chrono::{DateTime, Datelike as _, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("invalid proof key")]
pub struct InvalidKey;

/// Metadata for a stored proof file.
pub struct ProofStat {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Key/value store for proof files rooted at a local directory.
#[derive(Clone)]
pub struct ProofStore {
    root: PathBuf,
}

impl ProofStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Generate a fresh storage key for an upload.
    pub fn generate_key(wallet: &str, content_type: &str) -> String {
        let now = Utc::now();
        let prefix: String = wallet
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect::<String>()
            .to_lowercase();
        let ext = match content_type {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "application/pdf" => "pdf",
            "video/mp4" => "mp4",
            _ => "bin",
        };
        format!(
            "proofs/{:04}/{:02}/{:02}/{}/{}.{}",
            now.year(),
            now.month(),
            now.day(),
            prefix,
            Uuid::new_v4(),
            ext
        )
    }

    /// Resolve a key to a path under the root, rejecting traversal attempts.
    fn resolve(&self, key: &str) -> Result<PathBuf, InvalidKey> {
        if !key.starts_with("proofs/") || key.contains('\\') || key.contains("//") {
            return Err(InvalidKey);
        }
        if key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == ".." || part.contains('\0'))
        {
            return Err(InvalidKey);
        }
        Ok(self.root.join(key))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<u64> {
        let path = self.resolve(key)?;
        let parent = path.parent().context("proof key has no parent")?;
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create proof directory")?;

        let mut file = tokio::fs::File::create(&path)
            .await
            .context("failed to create proof file")?;
        file.write_all(bytes)
            .await
            .context("failed to write proof file")?;
        file.flush().await.context("failed to flush proof file")?;

        Ok(bytes.len() as u64)
    }

    /// Open a stored proof for streaming.
    pub async fn open(&self, key: &str) -> anyhow::Result<Option<tokio::fs::File>> {
        let path = self.resolve(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to open proof file"),
        }
    }

    pub async fn stat(&self, key: &str) -> anyhow::Result<Option<ProofStat>> {
        let path = self.resolve(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(ProofStat {
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("failed to stat proof file"),
        }
    }

    /// Remove a stored proof. Deleting an absent key is a no-op.
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("failed to delete proof file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (ProofStore, PathBuf) {
        let root = std::env::temp_dir().join(format!("proofdesk-blob-{}", Uuid::new_v4()));
        (ProofStore::new(root.clone()), root)
    }

    #[test]
    fn generated_keys_match_layout() {
        let key = ProofStore::generate_key("0xAbCdEf1234567890", "image/png");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0], "proofs");
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 2);
        assert_eq!(parts[3].len(), 2);
        assert_eq!(parts[4], "0xabcdef");
        assert!(parts[5].ends_with(".png"));
    }

    #[test]
    fn unknown_content_type_gets_bin_extension() {
        let key = ProofStore::generate_key("wallet", "application/x-whatever");
        assert!(key.ends_with(".bin"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let (store, _root) = temp_store();
        for key in [
            "../etc/passwd",
            "proofs/../../etc/passwd",
            "proofs/2026/08/24/w/../../x.png",
            "/proofs/2026/08/24/w/x.png",
            "proofs//x.png",
            "other/2026/08/24/w/x.png",
            "proofs/2026\\08\\x.png",
        ] {
            assert!(store.resolve(key).is_err(), "accepted {key}");
        }
    }

    #[tokio::test]
    async fn put_open_stat_delete_round_trip() -> anyhow::Result<()> {
        use tokio::io::AsyncReadExt as _;

        let (store, root) = temp_store();
        let key = ProofStore::generate_key("0xwallet", "image/png");

        let size = store.put(&key, b"proof bytes").await?;
        assert_eq!(size, 11);

        let mut file = store.open(&key).await?.expect("stored file");
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        assert_eq!(bytes, b"proof bytes");

        let stat = store.stat(&key).await?.expect("stored file");
        assert_eq!(stat.size, 11);
        assert!(stat.modified.is_some());

        store.delete(&key).await?;
        assert!(store.open(&key).await?.is_none());
        assert!(store.stat(&key).await?.is_none());

        // Deleting again is a no-op, and traversal keys are still rejected.
        store.delete(&key).await?;
        assert!(store.delete("proofs/../../etc/passwd").await.is_err());

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn missing_key_is_absent_not_error() -> anyhow::Result<()> {
        let (store, _root) = temp_store();
        assert!(store.open("proofs/2026/08/24/w/missing.png").await?.is_none());
        assert!(store.stat("proofs/2026/08/24/w/missing.png").await?.is_none());
        Ok(())
    }
}
