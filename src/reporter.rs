use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::descriptor::ProxyDescriptor;
use crate::validator::ValidationOutcome;

/// Receives every validated descriptor as soon as its unit completes.
#[async_trait]
pub trait ProbeReporter: Send + Sync {
    async fn report(&self, descriptor: &ProxyDescriptor, outcome: &ValidationOutcome) -> Result<()>;

    /// Called once after the whole run has joined.
    async fn finish(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Appends the raw link of every successful descriptor, one per line.
pub struct ValidListReporter<W> {
    writer: Mutex<W>,
}

impl<W> ValidListReporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl ValidListReporter<BufWriter<File>> {
    /// Create (or truncate) the output file.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)
            .await
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

#[async_trait]
impl<W> ProbeReporter for ValidListReporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn report(
        &self,
        descriptor: &ProxyDescriptor,
        outcome: &ValidationOutcome,
    ) -> Result<()> {
        if !outcome.is_success() {
            return Ok(());
        }

        let mut line = String::with_capacity(descriptor.raw.len() + 1);
        line.push_str(&descriptor.raw);
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn finish(&self) -> Result<()> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "ValidList"
    }
}
