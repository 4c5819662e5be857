use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;

use crate::error::EmbedError;

/// BERT sentence encoder: mean pooling over tokens followed by L2 normalization.
#[derive(Clone)]
pub struct BertEncoder {
    model: Arc<BertModel>,
    tokenizer: Tokenizer,
    device: Device,
    hidden_size: usize,
}

impl std::fmt::Debug for BertEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEncoder")
            .field("device", &self.device)
            .field("hidden_size", &self.hidden_size)
            .finish_non_exhaustive()
    }
}

fn fetch(repo: &hf_hub::api::sync::ApiRepo, repo_id: &str, file: &str) -> Result<std::path::PathBuf, EmbedError> {
    repo.get(file)
        .map_err(|e| EmbedError::ModelLoad(format!("failed to download {file} from {repo_id}: {e}")))
}

impl BertEncoder {
    /// Download (or reuse the cached copy of) a BERT model and load it on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if model download or loading fails.
    pub fn load(repo_id: &str, device: &Device) -> Result<Self, EmbedError> {
        let api = hf_hub::api::sync::Api::new().map_err(|e| {
            EmbedError::ModelLoad(format!("failed to create HuggingFace API client: {e}"))
        })?;
        let repo = api.model(repo_id.to_owned());

        let config_path = fetch(&repo, repo_id, "config.json")?;
        let tokenizer_path = fetch(&repo, repo_id, "tokenizer.json")?;
        let weights_path = fetch(&repo, repo_id, "model.safetensors")?;

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to read BERT config: {e}")))?;
        let config: BertConfig = serde_json::from_str(&config_str)?;
        let hidden_size = config.hidden_size;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbedError::ModelLoad(format!("failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file comes from the hf-hub cache and is not
        // modified while the VarBuilder holds the mapping.
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model: Arc::new(model),
            tokenizer,
            device: device.clone(),
            hidden_size,
        })
    }

    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// # Errors
    ///
    /// Returns an error if tokenization or the forward pass fails.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbedError::Inference(format!("tokenizer encode failed: {e}")))?;

        let token_ids = encoding.get_ids();
        let type_ids: Vec<u32> = vec![0; token_ids.len()];

        let input_ids = Tensor::new(token_ids, &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(type_ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let hidden = self.model.forward(&input_ids, &token_type_ids, None)?;

        let seq_len = u32::try_from(hidden.dim(1)?)
            .map_err(|e| EmbedError::Inference(format!("sequence length overflow: {e}")))?;
        let pooled = (hidden.sum(1)? / f64::from(seq_len))?;

        let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norm)?.squeeze(0)?;

        normalized.to_vec1::<f32>().map_err(EmbedError::Candle)
    }
}
