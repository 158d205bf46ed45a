use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::qwen2;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Cache, Repo, RepoType};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;

use crate::{EmbedError, EmbeddingModel};

pub const CANDLE_EMBEDDING_DIM: usize = 1024;
const CHECKSUMS_FILE: &str = "checksums.txt";
const MAX_TOKENS: usize = 8192;
const REQUIRED_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

/// Local Qwen3 embedding model run on CPU through candle.
///
/// Weights are downloaded (once) and loaded in [`CandleEmbeddingModel::load`].
pub struct CandleEmbeddingModel {
    repo: String,
    model: Mutex<qwen2::Model>,
    tokenizer: Mutex<Tokenizer>,
    device: Device,
}

#[derive(Debug, Clone)]
struct ModelFiles {
    model_root: PathBuf,
    config_path: PathBuf,
    tokenizer_path: PathBuf,
    weights_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct QwenConfig {
    hidden_size: usize,
}

impl ModelFiles {
    fn from_root(model_root: PathBuf) -> Self {
        Self {
            config_path: model_root.join("config.json"),
            tokenizer_path: model_root.join("tokenizer.json"),
            weights_path: model_root.join("model.safetensors"),
            model_root,
        }
    }

    fn all_present(&self) -> bool {
        self.config_path.exists() && self.tokenizer_path.exists() && self.weights_path.exists()
    }
}

impl CandleEmbeddingModel {
    pub fn load(model_dir: PathBuf, repo: String) -> Result<Self, EmbedError> {
        let model_root = model_dir.join(repo_dir_name(&repo));
        let files = ensure_model_files(&model_root, &repo)?;

        let config_json = fs::read_to_string(&files.config_path)?;
        let parsed_cfg: QwenConfig = serde_json::from_str(&config_json)?;
        if parsed_cfg.hidden_size != CANDLE_EMBEDDING_DIM {
            return Err(EmbedError::ModelUnavailable(format!(
                "unexpected model hidden size {} (expected {})",
                parsed_cfg.hidden_size, CANDLE_EMBEDDING_DIM
            )));
        }
        let config: qwen2::Config = serde_json::from_str(&config_json)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer_path)
            .map_err(|err| EmbedError::Tokenizer(err.to_string()))?;

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(
                std::slice::from_ref(&files.weights_path),
                DType::F32,
                &device,
            )?
        };
        let model = qwen2::Model::new(&config, vb)?;
        tracing::info!(model_repo = %repo, "loaded candle embedding model on CPU");

        Ok(Self {
            repo,
            model: Mutex::new(model),
            tokenizer: Mutex::new(tokenizer),
            device,
        })
    }

    fn embed_chunk(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (encodings, pad_id) = {
            let tokenizer = self
                .tokenizer
                .lock()
                .map_err(|_| EmbedError::LockPoisoned("candle tokenizer".to_owned()))?;
            let pad_id = tokenizer
                .get_padding()
                .map(|params| params.pad_id)
                .unwrap_or(0);
            let encodings = tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|err| EmbedError::Tokenizer(err.to_string()))?;
            (encodings, pad_id)
        };

        let max_len = encodings
            .iter()
            .map(|encoding| encoding.get_ids().len().min(MAX_TOKENS))
            .max()
            .unwrap_or(0);

        if max_len == 0 {
            return Ok(vec![vec![0.0; CANDLE_EMBEDDING_DIM]; texts.len()]);
        }

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_masks = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(MAX_TOKENS);

            input_ids.extend_from_slice(&ids[..len]);
            attention_masks.extend_from_slice(&mask[..len]);

            if len < max_len {
                input_ids.extend(std::iter::repeat_n(pad_id, max_len - len));
                attention_masks.extend(std::iter::repeat_n(0u32, max_len - len));
            }
        }

        let input_ids = Tensor::from_vec(input_ids, (texts.len(), max_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(attention_masks, (texts.len(), max_len), &self.device)?;

        let hidden_states = {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbedError::LockPoisoned("candle model".to_owned()))?;
            model.clear_kv_cache();
            let output = model.forward(&input_ids, 0, Some(&attention_mask))?;
            model.clear_kv_cache();
            output
        };

        let pooled = mean_pool(&hidden_states, &attention_mask)?.to_dtype(DType::F32)?;
        let rows = pooled.to_vec2::<f32>()?;

        if let Some(row) = rows.iter().find(|row| row.len() != CANDLE_EMBEDDING_DIM) {
            return Err(EmbedError::InvalidEmbeddingResponse(format!(
                "expected {} dimensions from candle model, got {}",
                CANDLE_EMBEDDING_DIM,
                row.len()
            )));
        }

        Ok(rows)
    }
}

impl EmbeddingModel for CandleEmbeddingModel {
    fn name(&self) -> &str {
        &self.repo
    }

    fn dimension(&self) -> usize {
        CANDLE_EMBEDDING_DIM
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut outputs = vec![vec![0.0; CANDLE_EMBEDDING_DIM]; texts.len()];

        let active = texts
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(index, text)| (index, text.as_str()))
            .collect::<Vec<_>>();
        if active.is_empty() {
            return Ok(outputs);
        }

        let inputs = active.iter().map(|(_, text)| *text).collect::<Vec<_>>();
        let embedded = self.embed_chunk(&inputs)?;
        for ((index, _), embedding) in active.iter().zip(embedded) {
            outputs[*index] = embedding;
        }

        Ok(outputs)
    }
}

fn repo_dir_name(repo: &str) -> String {
    repo.replace('/', "--").to_ascii_lowercase()
}

fn ensure_model_files(model_root: &Path, repo: &str) -> Result<ModelFiles, EmbedError> {
    fs::create_dir_all(model_root)?;

    let files = ModelFiles::from_root(model_root.to_path_buf());
    if files.all_present() && verify_checksums(&files)? {
        return Ok(files);
    }

    download_model_files(&files, repo)?;
    write_checksums(&files)?;

    if !verify_checksums(&files)? {
        return Err(EmbedError::ModelUnavailable(format!(
            "downloaded model files failed checksum verification at {}",
            files.model_root.display()
        )));
    }

    Ok(files)
}

fn download_model_files(files: &ModelFiles, repo: &str) -> Result<(), EmbedError> {
    let cache = Cache::new(files.model_root.join("hf-cache"));
    let api = ApiBuilder::from_cache(cache).build()?;
    let api_repo = api.repo(Repo::new(repo.to_owned(), RepoType::Model));

    tracing::info!(
        model_repo = repo,
        model_dir = %files.model_root.display(),
        "downloading candle embedding model files"
    );

    for filename in REQUIRED_FILES {
        let source_path = api_repo.get(filename).map_err(|err| {
            EmbedError::ModelUnavailable(format!(
                "model not found at {} (failed downloading {} from {}: {}). Retry with network access or set [embeddings] provider = \"mock\".",
                files.model_root.display(),
                filename,
                repo,
                err
            ))
        })?;

        fs::copy(&source_path, files.model_root.join(filename)).map_err(|err| {
            EmbedError::ModelUnavailable(format!(
                "failed to copy downloaded model file {} into {}: {}",
                filename,
                files.model_root.display(),
                err
            ))
        })?;
    }

    Ok(())
}

fn write_checksums(files: &ModelFiles) -> Result<(), EmbedError> {
    let mut output = File::create(files.model_root.join(CHECKSUMS_FILE))?;
    for filename in REQUIRED_FILES {
        let checksum = sha256_file(files.model_root.join(filename))?;
        writeln!(output, "{checksum}  {filename}")?;
    }
    Ok(())
}

fn verify_checksums(files: &ModelFiles) -> Result<bool, EmbedError> {
    let checksum_path = files.model_root.join(CHECKSUMS_FILE);
    if !checksum_path.exists() {
        return Ok(false);
    }

    let file = File::open(checksum_path)?;
    let mut seen = HashSet::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let (Some(expected), Some(filename)) = (parts.next(), parts.next()) else {
            continue;
        };
        if !REQUIRED_FILES.contains(&filename) {
            continue;
        }

        let path = files.model_root.join(filename);
        if !path.exists() || sha256_file(&path)? != expected {
            tracing::warn!(
                file = filename,
                model_dir = %files.model_root.display(),
                "checksum mismatch for candle embedding model file"
            );
            return Ok(false);
        }

        seen.insert(filename.to_owned());
    }

    Ok(REQUIRED_FILES.iter().all(|name| seen.contains(*name)))
}

fn mean_pool(last_hidden_state: &Tensor, attention_mask: &Tensor) -> Result<Tensor, EmbedError> {
    let (batch, seq, hidden) = last_hidden_state.dims3()?;
    let mask = attention_mask.to_dtype(last_hidden_state.dtype())?;
    let expanded_mask = mask.unsqueeze(2)?.broadcast_as((batch, seq, hidden))?;
    let summed = (last_hidden_state * expanded_mask)?.sum(1)?;
    let counts = mask.sum(1)?.unsqueeze(1)?.expand((batch, hidden))?;
    Ok(summed.broadcast_div(&counts)?)
}

fn sha256_file(path: impl AsRef<Path>) -> Result<String, EmbedError> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(bytes);
    Ok(format!("{digest:x}"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn repo_names_become_flat_directory_names() {
        assert_eq!(
            repo_dir_name("Qwen/Qwen3-Embedding-0.6B"),
            "qwen--qwen3-embedding-0.6b"
        );
    }

    #[test]
    fn checksums_detect_tampered_files() {
        let temp = tempdir().expect("tempdir");
        let files = ModelFiles::from_root(temp.path().to_path_buf());
        for name in REQUIRED_FILES {
            fs::write(temp.path().join(name), name).expect("write model file");
        }

        assert!(!verify_checksums(&files).expect("no checksum file yet"));
        write_checksums(&files).expect("write checksums");
        assert!(verify_checksums(&files).expect("verify"));

        fs::write(&files.weights_path, "tampered").expect("tamper");
        assert!(!verify_checksums(&files).expect("verify tampered"));
    }

    #[test]
    fn mean_pool_ignores_padding_positions() {
        let hidden = Tensor::from_vec(
            vec![1.0f32, 1.0, 3.0, 3.0, 100.0, 100.0],
            (1, 3, 2),
            &Device::Cpu,
        )
        .expect("hidden");
        let mask = Tensor::from_vec(vec![1u32, 1, 0], (1, 3), &Device::Cpu).expect("mask");

        let pooled = mean_pool(&hidden, &mask)
            .expect("pool")
            .to_vec2::<f32>()
            .expect("rows");
        assert_eq!(pooled, vec![vec![2.0, 2.0]]);
    }
}
