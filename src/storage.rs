use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;

/// Where uploaded PDFs are kept. References are opaque to the caller.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<String>;

    async fn discard(&self, reference: &str) -> anyhow::Result<()>;
}

pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub async fn new(root: impl Into<PathBuf>) -> anyhow::Result<LocalFileStore> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage directory {}", root.display()))?;
        Ok(LocalFileStore { root })
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<String> {
        let name = sanitize(name);
        if name.is_empty() {
            anyhow::bail!("Refusing to store a file without a name");
        }
        let target = self.root.join(&name);
        let partial = self.root.join(format!(".{}.part", name));

        tokio::fs::write(&partial, bytes)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        if let Err(err) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(err).with_context(|| format!("Failed to move file into {}", target.display()));
        }
        Ok(target.to_string_lossy().into_owned())
    }

    async fn discard(&self, reference: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(reference).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Failed to remove {}", reference)),
        }
    }
}
