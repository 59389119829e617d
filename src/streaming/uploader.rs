//! Background geometry uploads into the buffer pool

use std::collections::HashSet;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::core::Result;
use crate::render::buffer::{BufferPool, ChunkId, GeometryBuilder};

/// Geometry to upload, tagged by the caller for matching results
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub tag: u64,
    pub builder: GeometryBuilder,
}

/// Outcome of one upload
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResult {
    /// Stored under a new chunk
    Uploaded { tag: u64, chunk: ChunkId },
    /// Invalid geometry, nothing stored
    Rejected { tag: u64 },
    /// Device failure during allocation
    Failed { tag: u64, error: String },
}

impl UploadResult {
    pub fn tag(&self) -> u64 {
        match self {
            Self::Uploaded { tag, .. } | Self::Rejected { tag } | Self::Failed { tag, .. } => *tag,
        }
    }
}

/// Feeds a shared [`BufferPool`] from a tokio task so ingestion never blocks
/// the render thread. Allocations run on the blocking pool since they wait
/// for the staging copy.
pub struct GeometryUploader {
    request_tx: mpsc::UnboundedSender<UploadRequest>,
    result_rx: mpsc::UnboundedReceiver<UploadResult>,
    pending: HashSet<u64>,
    /// Owned runtime, `None` when running on the caller's runtime
    #[allow(dead_code)]
    runtime: Option<Runtime>,
}

impl GeometryUploader {
    /// Create an uploader with its own runtime
    pub fn new(pool: Arc<BufferPool>) -> Result<Self> {
        let runtime = Runtime::new()?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        runtime.spawn(Self::worker_loop(pool, request_rx, result_tx));

        Ok(Self {
            request_tx,
            result_rx,
            pending: HashSet::new(),
            runtime: Some(runtime),
        })
    }

    /// Create an uploader on the current tokio runtime.
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn new_with_current_runtime(pool: Arc<BufferPool>) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::worker_loop(pool, request_rx, result_tx));

        Self {
            request_tx,
            result_rx,
            pending: HashSet::new(),
            runtime: None,
        }
    }

    async fn worker_loop(
        pool: Arc<BufferPool>,
        mut request_rx: mpsc::UnboundedReceiver<UploadRequest>,
        result_tx: mpsc::UnboundedSender<UploadResult>,
    ) {
        while let Some(request) = request_rx.recv().await {
            let tag = request.tag;
            let pool = pool.clone();
            let outcome =
                tokio::task::spawn_blocking(move || pool.allocate_buffer(&request.builder)).await;

            let result = match outcome {
                Ok(Ok(Some(chunk))) => UploadResult::Uploaded { tag, chunk },
                Ok(Ok(None)) => UploadResult::Rejected { tag },
                Ok(Err(e)) => UploadResult::Failed { tag, error: e.to_string() },
                Err(e) => UploadResult::Failed { tag, error: format!("upload task panicked: {}", e) },
            };
            if result_tx.send(result).is_err() {
                break;
            }
        }
        log::debug!("GeometryUploader: worker stopped");
    }

    /// Queue an upload.
    ///
    /// Returns `false` if the tag is already pending or the worker is gone.
    pub fn submit(&mut self, request: UploadRequest) -> bool {
        if self.pending.contains(&request.tag) {
            return false;
        }
        let tag = request.tag;
        if self.request_tx.send(request).is_err() {
            log::warn!("GeometryUploader: worker gone, dropping upload {}", tag);
            return false;
        }
        self.pending.insert(tag);
        true
    }

    /// Drain finished uploads without blocking
    pub fn poll_results(&mut self) -> Vec<UploadResult> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            self.pending.remove(&result.tag());
            results.push(result);
        }
        results
    }

    /// Wait for the next finished upload; `None` once nothing is pending
    pub async fn next_result(&mut self) -> Option<UploadResult> {
        if self.pending.is_empty() {
            return None;
        }
        let result = self.result_rx.recv().await?;
        self.pending.remove(&result.tag());
        Some(result)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, tag: u64) -> bool {
        self.pending.contains(&tag)
    }
}
