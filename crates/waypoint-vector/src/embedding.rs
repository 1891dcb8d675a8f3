//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` runs a multilingual sentence-transformer
//!   (e.g. multilingual-e5-small) exported to ONNX, tokenized with the
//!   HuggingFace tokenizers crate. Callers apply the e5 `query:` /
//!   `passage:` prefixes themselves.
//! - `MockEmbedding` produces deterministic hash-based unit vectors for
//!   tests and for running the service without model files.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

use waypoint_core::error::{Result, WaypointError};

/// Service for generating text embeddings.
///
/// Vectors are unit-normalized and deterministic per model version, so
/// cosine similarity reduces to a dot product.
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text.
    fn embed(&self, text: &str) -> impl std::future::Future<Output = Result<Vec<f32>>> + Send;

    /// Embed a batch of texts, in order. Used by startup preloads.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>>> + Send;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not object
/// safe; this trait boxes the futures so `Arc<dyn DynEmbeddingService>`
/// can be stored without generics. Every `EmbeddingService` implements it
/// via the blanket impl below.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    fn embed_batch_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>>
    {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService
// ---------------------------------------------------------------------------

/// ONNX Runtime-backed sentence-transformer embeddings.
///
/// Expects a model directory containing `model.onnx` and
/// `tokenizer.json`. The model takes `input_ids`, `attention_mask`, and
/// `token_type_ids` as i64 tensors and produces token-level embeddings.
/// Inference is batch-first: rows are padded to the widest sequence,
/// run in one pass, then masked mean pooling and L2 normalization yield
/// one unit vector per row.
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// ort::Session is internally reference-counted and safe to share behind
// the Mutex above.
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OnnxEmbeddingService {
    /// Load from a directory containing `model.onnx` and `tokenizer.json`.
    pub fn from_directory(model_dir: &Path) -> Result<Self> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    /// Load from explicit model and tokenizer paths.
    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(WaypointError::Embedding(format!(
                "ONNX model not found at {}",
                model_path.display()
            )));
        }
        if !tokenizer_path.exists() {
            return Err(WaypointError::Embedding(format!(
                "Tokenizer not found at {}",
                tokenizer_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| WaypointError::Embedding(format!("ONNX session builder: {}", e)))?
            .with_intra_threads(1)
            .map_err(|e| WaypointError::Embedding(format!("ONNX set threads: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| WaypointError::Embedding(format!("ONNX load model: {}", e)))?;

        // Output shape is [batch, seq_len, hidden_dim]; read hidden_dim
        // from the model, defaulting to the e5-small width.
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .map(|d| if d > 0 { d as usize } else { 384 })
            .unwrap_or(384);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| WaypointError::Embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    fn clone_handle(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            tokenizer: Arc::clone(&self.tokenizer),
            dimensions: self.dimensions,
        }
    }

    /// Tokenize a batch, run one padded inference pass, pool each row.
    ///
    /// Index preloads embed whole name lists at once, so this is the
    /// primary path; single texts run as a batch of one. Padded
    /// positions carry a zero attention mask and are skipped by the
    /// mean pool.
    fn infer_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(WaypointError::Embedding("Cannot embed empty text".to_string()));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| WaypointError::Embedding(format!("Tokenization failed: {}", e)))?;

        let batch = encodings.len();
        let width = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0);
        if width == 0 {
            return Err(WaypointError::Embedding("Tokenizer produced no tokens".to_string()));
        }

        // Pad every row out to the widest sequence in the batch.
        let mut ids = vec![0i64; batch * width];
        let mut mask = vec![0i64; batch * width];
        let mut types = vec![0i64; batch * width];
        for (row, enc) in encodings.iter().enumerate() {
            let base = row * width;
            for (col, &id) in enc.get_ids().iter().enumerate() {
                ids[base + col] = i64::from(id);
            }
            for (col, &m) in enc.get_attention_mask().iter().enumerate() {
                mask[base + col] = i64::from(m);
            }
            for (col, &t) in enc.get_type_ids().iter().enumerate() {
                types[base + col] = i64::from(t);
            }
        }

        let id_tensor = ndarray::Array2::from_shape_vec((batch, width), ids)
            .map_err(|e| WaypointError::Embedding(format!("input_ids tensor: {}", e)))?;
        let mask_tensor = ndarray::Array2::from_shape_vec((batch, width), mask)
            .map_err(|e| WaypointError::Embedding(format!("attention_mask tensor: {}", e)))?;
        let type_tensor = ndarray::Array2::from_shape_vec((batch, width), types)
            .map_err(|e| WaypointError::Embedding(format!("token_type_ids tensor: {}", e)))?;

        let id_view = TensorRef::from_array_view(&id_tensor)
            .map_err(|e| WaypointError::Embedding(format!("TensorRef input_ids: {}", e)))?;
        let mask_view = TensorRef::from_array_view(&mask_tensor)
            .map_err(|e| WaypointError::Embedding(format!("TensorRef attention_mask: {}", e)))?;
        let type_view = TensorRef::from_array_view(&type_tensor)
            .map_err(|e| WaypointError::Embedding(format!("TensorRef token_type_ids: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| WaypointError::Embedding(format!("Session lock poisoned: {}", e)))?;
        let outputs = session
            .run(ort::inputs![id_view, mask_view, type_view])
            .map_err(|e| WaypointError::Embedding(format!("ONNX inference failed: {}", e)))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| WaypointError::Embedding(format!("Extract embeddings: {}", e)))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        if dims.len() != 3 || dims[0] as usize != batch || dims[1] as usize != width {
            return Err(WaypointError::Embedding(format!(
                "Unexpected output shape: {:?}",
                dims
            )));
        }
        let hidden = dims[2] as usize;

        let mut vectors = Vec::with_capacity(batch);
        for (row, enc) in encodings.iter().enumerate() {
            let row_mask = enc.get_attention_mask();
            let mut pooled = vec![0.0f32; hidden];
            let mut kept = 0.0f32;
            for col in 0..width {
                if col >= row_mask.len() || row_mask[col] == 0 {
                    continue;
                }
                let at = (row * width + col) * hidden;
                for (dim, slot) in pooled.iter_mut().enumerate() {
                    *slot += data[at + dim];
                }
                kept += 1.0;
            }
            if kept > 0.0 {
                for slot in &mut pooled {
                    *slot /= kept;
                }
            }
            normalize(&mut pooled);
            vectors.push(pooled);
        }

        Ok(vectors)
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // Inference is CPU-bound; keep it off the async workers.
        let handle = self.clone_handle();
        let single = vec![text.to_string()];
        let mut vectors = tokio::task::spawn_blocking(move || handle.infer_batch(&single))
            .await
            .map_err(|e| WaypointError::Embedding(format!("Embedding task panicked: {}", e)))??;
        vectors
            .pop()
            .ok_or_else(|| WaypointError::Embedding("Inference returned no rows".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let handle = self.clone_handle();
        let texts_owned: Vec<String> = texts.to_vec();
        tokio::task::spawn_blocking(move || handle.infer_batch(&texts_owned))
            .await
            .map_err(|e| WaypointError::Embedding(format!("Embedding task panicked: {}", e)))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding
// ---------------------------------------------------------------------------

/// Deterministic 384-dimensional hash-based embeddings.
///
/// Identical inputs always produce identical unit vectors, so matching
/// and routing behave reproducibly without a model on disk.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(384);
        for i in 0..384 {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(WaypointError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        384
    }
}

/// L2-normalize in place. Zero vectors are left untouched.
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in v {
            *val /= norm;
        }
    }
}
