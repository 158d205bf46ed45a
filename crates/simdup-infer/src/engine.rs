use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use simdup_config::EmbeddingsConfig;
use simdup_core::{DEFAULT_SCOPE, Symbol};

use crate::{EmbedError, EmbeddingModel, load_embedding_model};

const PROBE_TEXT: &str = "name: probe | type: function | content: probe";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineInfo {
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub normalize: bool,
}

/// Batches symbols through an [`EmbeddingModel`].
pub struct EmbeddingEngine {
    model: Arc<dyn EmbeddingModel>,
    batch_size: usize,
    normalize: bool,
}

impl EmbeddingEngine {
    /// Wraps `model` and runs one probe encode so a broken model fails here
    /// rather than halfway through a run.
    pub fn new(model: Arc<dyn EmbeddingModel>, config: &EmbeddingsConfig) -> Result<Self, EmbedError> {
        if model.dimension() == 0 {
            return Err(EmbedError::ModelUnavailable(format!(
                "model {} reports zero dimensions",
                model.name()
            )));
        }

        let probe = model.encode(&[PROBE_TEXT.to_owned()])?;
        match probe.as_slice() {
            [vector] if vector.len() == model.dimension() => {}
            [vector] => {
                return Err(EmbedError::ModelUnavailable(format!(
                    "model {} produced {} dimensions, expected {}",
                    model.name(),
                    vector.len(),
                    model.dimension()
                )));
            }
            other => {
                return Err(EmbedError::LengthMismatch {
                    expected: 1,
                    actual: other.len(),
                });
            }
        }

        tracing::info!(
            model = model.name(),
            dimension = model.dimension(),
            batch_size = config.batch_size,
            normalize = config.normalize,
            "embedding engine ready"
        );

        Ok(Self {
            model,
            batch_size: config.batch_size.max(1),
            normalize: config.normalize,
        })
    }

    pub fn from_config(
        workspace_root: impl AsRef<Path>,
        config: &EmbeddingsConfig,
    ) -> Result<Self, EmbedError> {
        let model = load_embedding_model(workspace_root, config)?;
        Self::new(model, config)
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            model: self.model.name().to_owned(),
            dimension: self.model.dimension(),
            batch_size: self.batch_size,
            normalize: self.normalize,
        }
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    /// One vector per symbol, in input order.
    pub fn generate(&self, symbols: &[Symbol]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let texts = symbols.iter().map(canonical_text).collect::<Vec<_>>();
        self.generate_texts(&texts)
    }

    pub fn generate_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (chunk_index, chunk) in texts.chunks(self.batch_size).enumerate() {
            let encoded = self.model.encode(chunk)?;
            if encoded.len() != chunk.len() {
                return Err(EmbedError::LengthMismatch {
                    expected: chunk.len(),
                    actual: encoded.len(),
                });
            }

            for mut vector in encoded {
                if vector.len() != self.model.dimension() {
                    return Err(EmbedError::InvalidEmbeddingResponse(format!(
                        "expected {} dimensions, got {}",
                        self.model.dimension(),
                        vector.len()
                    )));
                }
                if self.normalize {
                    l2_normalize(&mut vector);
                }
                vectors.push(vector);
            }
            tracing::debug!(chunk = chunk_index, size = chunk.len(), "embedded chunk");
        }

        Ok(vectors)
    }
}

/// Text form of a symbol fed to the model. Absent optional fields are omitted.
pub fn canonical_text(symbol: &Symbol) -> String {
    let mut text = format!(
        "name: {} | type: {} | content: {}",
        symbol.name,
        symbol.kind.as_str(),
        symbol.content.trim()
    );

    if let Some(parameters) = symbol.parameters.as_ref().filter(|params| !params.is_empty()) {
        text.push_str(" | parameters: ");
        text.push_str(&parameters.join(", "));
    }
    if let Some(return_type) = symbol.return_type.as_deref() {
        text.push_str(" | returns: ");
        text.push_str(return_type);
    }
    if !symbol.scope.is_empty() && symbol.scope != DEFAULT_SCOPE {
        text.push_str(" | scope: ");
        text.push_str(&symbol.scope);
    }

    text
}

/// Scales `embedding` to unit length. A zero vector is left untouched.
pub fn l2_normalize(embedding: &mut [f32]) {
    let norm_sq = embedding
        .iter()
        .map(|value| value * value)
        .fold(0.0f32, |acc, value| acc + value);

    let norm = norm_sq.sqrt();
    if norm < 1e-8 {
        return;
    }

    for value in embedding.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use simdup_core::SymbolKind;

    use super::*;
    use crate::MockEmbeddingModel;

    struct RecordingModel {
        inner: MockEmbeddingModel,
        chunks: Mutex<Vec<usize>>,
    }

    impl EmbeddingModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.chunks
                .lock()
                .map_err(|_| EmbedError::LockPoisoned("chunks".to_owned()))?
                .push(texts.len());
            self.inner.encode(texts)
        }
    }

    struct BrokenModel;

    impl EmbeddingModel for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimension(&self) -> usize {
            16
        }

        fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::ModelUnavailable("weights missing".to_owned()))
        }
    }

    fn config(batch_size: usize, normalize: bool) -> EmbeddingsConfig {
        EmbeddingsConfig {
            batch_size,
            normalize,
            ..EmbeddingsConfig::default()
        }
    }

    fn symbol(name: &str, content: &str) -> Symbol {
        Symbol::new(name, SymbolKind::Function, "src/app.py", 1, content)
    }

    #[test]
    fn canonical_text_omits_absent_fields_and_module_scope() {
        let mut plain = symbol("f", "  def f(x): return x+1  ");
        assert_eq!(
            canonical_text(&plain),
            "name: f | type: function | content: def f(x): return x+1"
        );

        plain.parameters = Some(vec!["x".to_owned(), "y".to_owned()]);
        plain.return_type = Some("int".to_owned());
        plain.scope = "class".to_owned();
        assert_eq!(
            canonical_text(&plain),
            "name: f | type: function | content: def f(x): return x+1 | parameters: x, y | returns: int | scope: class"
        );

        let again = plain.clone();
        assert_eq!(canonical_text(&plain), canonical_text(&again));
    }

    #[test]
    fn generate_preserves_order_across_chunks() {
        let model = Arc::new(RecordingModel {
            inner: MockEmbeddingModel::new(16),
            chunks: Mutex::new(Vec::new()),
        });
        let engine = EmbeddingEngine::new(model.clone(), &config(2, true)).expect("engine");

        let symbols = (0..5)
            .map(|index| symbol(&format!("f{index}"), &format!("def f{index}(): return {index}")))
            .collect::<Vec<_>>();
        let batched = engine.generate(&symbols).expect("generate");

        let one_by_one = symbols
            .iter()
            .map(|symbol| {
                engine
                    .generate(std::slice::from_ref(symbol))
                    .expect("single")
                    .remove(0)
            })
            .collect::<Vec<_>>();

        assert_eq!(batched.len(), 5);
        assert_eq!(batched, one_by_one);
        let chunks = model.chunks.lock().expect("chunks").clone();
        assert_eq!(&chunks[..4], &[1, 2, 2, 1]);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let engine = EmbeddingEngine::new(Arc::new(MockEmbeddingModel::new(8)), &config(4, true))
            .expect("engine");
        assert!(engine.generate(&[]).expect("generate").is_empty());
    }

    #[test]
    fn normalization_is_optional_and_zero_safe() {
        let raw = EmbeddingEngine::new(Arc::new(MockEmbeddingModel::new(8)), &config(4, false))
            .expect("engine");
        let normalized =
            EmbeddingEngine::new(Arc::new(MockEmbeddingModel::new(8)), &config(4, true))
                .expect("engine");

        let texts = vec!["alpha alpha".to_owned(), "".to_owned()];
        let raw_vectors = raw.generate_texts(&texts).expect("raw");
        let unit_vectors = normalized.generate_texts(&texts).expect("normalized");

        let norm = |vector: &[f32]| vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm(&raw_vectors[0]) - 2.0).abs() < 1e-5);
        assert!((norm(&unit_vectors[0]) - 1.0).abs() < 1e-5);
        assert!(unit_vectors[1].iter().all(|value| *value == 0.0));
    }

    #[test]
    fn broken_model_fails_at_construction() {
        let err = match EmbeddingEngine::new(Arc::new(BrokenModel), &config(4, true)) {
            Ok(_) => panic!("engine should not build"),
            Err(err) => err,
        };
        assert!(matches!(err, EmbedError::ModelUnavailable(_)));
    }

    #[test]
    fn l2_normalize_scales_to_unit_length() {
        let mut embedding = vec![3.0f32, 4.0, 0.0];
        l2_normalize(&mut embedding);
        assert!((embedding[0] - 0.6).abs() < 1e-6);
        assert!((embedding[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0f32; 3];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);
    }
}
