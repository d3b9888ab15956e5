//! `IndexPipeline`: the external collaborator that turns a local checkout
//! into document + embedding counts. Treated as opaque by `SyncEngine`; this
//! module also ships one concrete, filesystem-backed reference implementation
//! for standalone use and tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::chunking::{chunk_document, ChunkConfig};
use crate::embeddings::{EmbeddingConfig, EmbeddingGenerator};

/// Cooperative cancellation signal shared between the scheduler and the
/// long-running work it dispatches. Cheap to clone; checked at natural
/// yield points rather than used to forcibly abort a task.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Output of a successful pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOutput {
    pub document_count: u64,
    pub embedding_count: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no documents found at {0}")]
    NoDocuments(String),
    #[error("index pipeline failed: {0}")]
    Failed(String),
    #[error("index pipeline cancelled")]
    Cancelled,
}

/// Given a local checkout, produce document and embedding counts. Pipeline
/// is idempotent with respect to the filesystem contents at `local_path` —
/// re-running against unchanged contents must be safe to repeat.
#[async_trait]
pub trait IndexPipeline: Send + Sync {
    async fn run(
        &self,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError>;
}

/// Reference `IndexPipeline`: walks the checkout with a `.gitignore`-aware
/// walker, chunks each text file, and embeds the chunks in batches. Real
/// deployments are expected to supply their own pipeline (e.g. one backed
/// by a document database); this implementation exists so the crate is
/// exercisable end to end without an external service.
pub struct FsIndexPipeline {
    chunk_config: ChunkConfig,
    embedder: Arc<EmbeddingGenerator>,
    batch_size: usize,
}

impl FsIndexPipeline {
    pub fn new(embedding_config: EmbeddingConfig) -> anyhow::Result<Self> {
        let batch_size = embedding_config.batch_size;
        let embedder = EmbeddingGenerator::new(embedding_config)?;
        Ok(Self {
            chunk_config: ChunkConfig::default(),
            embedder: Arc::new(embedder),
            batch_size,
        })
    }

    fn is_text_file(path: &Path) -> bool {
        const EXTENSIONS: &[&str] = &[
            "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "kt", "rb", "c", "cpp", "h",
            "hpp", "md", "mdx", "txt", "toml", "yaml", "yml", "json",
        ];
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| EXTENSIONS.contains(&e))
            .unwrap_or(false)
    }
}

#[async_trait]
impl IndexPipeline for FsIndexPipeline {
    async fn run(
        &self,
        local_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut documents: Vec<String> = Vec::new();

        for entry in WalkBuilder::new(local_path).hidden(false).build() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_file() || !Self::is_text_file(path) {
                continue;
            }

            match tokio::fs::read_to_string(path).await {
                Ok(content) if !content.trim().is_empty() => documents.push(content),
                Ok(_) => {}
                Err(e) => {
                    debug!(file = %path.display(), error = %e, "skipping unreadable file");
                }
            }
        }

        if documents.is_empty() {
            return Err(PipelineError::NoDocuments(local_path.display().to_string()));
        }

        let mut total_embeddings = 0u64;

        for document in &documents {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let chunks = chunk_document(document, &self.chunk_config)
                .map_err(|e| PipelineError::Failed(e.to_string()))?;

            for batch in chunks.chunks(self.batch_size) {
                let texts: Vec<&str> = batch.iter().map(|c| c.content.as_str()).collect();
                let embeddings = self
                    .embedder
                    .embed_batch(&texts)
                    .await
                    .map_err(|e| PipelineError::Failed(e.to_string()))?;
                total_embeddings += embeddings.len() as u64;
            }
        }

        Ok(PipelineOutput {
            document_count: documents.len() as u64,
            embedding_count: total_embeddings,
        })
    }
}
