//! Local causal-LM loading and generation.
//!
//! The model directory is a plain HuggingFace-style checkpoint on disk.
//! Loading is fatal on missing artifacts (the chat feature stays unavailable
//! for the process lifetime); generation errors are per-request.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use candle_transformers::utils::apply_repeat_penalty;
use rand::Rng;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::{PersonaError, Result};

/// Artifacts that must exist before a load is attempted.
pub const REQUIRED_MODEL_FILES: [&str; 4] = [
    "config.json",
    "tokenizer.json",
    "tokenizer.model",
    "tokenizer_config.json",
];

pub const MAX_NEW_TOKENS: usize = 200;

const TEMPERATURE: f64 = 0.85;
const TOP_P: f64 = 0.92;
const REPEAT_PENALTY: f32 = 1.15;

/// Seam between the orchestrator and the model runtime. Tests substitute a
/// scripted implementation.
pub trait TextGenerator: Send + Sync {
    /// Generate the full continuation for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate incrementally, invoking `on_token` per decoded fragment, and
    /// return the full continuation.
    fn generate_streaming(&self, prompt: &str, on_token: &mut dyn FnMut(&str)) -> Result<String>;
}

/// Check the model directory holds a loadable checkpoint and return the
/// weight shard paths.
pub fn validate_model_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PersonaError::ModelLoad(format!(
            "model directory not found: {}",
            dir.display()
        )));
    }

    for file in REQUIRED_MODEL_FILES {
        let path = dir.join(file);
        if !path.exists() {
            return Err(PersonaError::ModelLoad(format!(
                "required file not found: {}",
                path.display()
            )));
        }
    }

    let mut weights: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    weights.sort();

    if weights.is_empty() {
        return Err(PersonaError::ModelLoad(format!(
            "no model weights found in {} (*.safetensors)",
            dir.display()
        )));
    }

    Ok(weights)
}

pub struct RoleplayModel {
    model: Llama,
    tokenizer: Tokenizer,
    config: Config,
    device: Device,
    dtype: DType,
    eos_tokens: Option<LlamaEosToks>,
}

impl RoleplayModel {
    pub fn load(dir: &Path) -> Result<Self> {
        info!(dir = %dir.display(), "loading roleplay model");
        let weights = validate_model_dir(dir)?;

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| PersonaError::ModelLoad(format!("tokenizer: {}", e)))?;

        let raw_config = std::fs::read(dir.join("config.json"))?;
        let config: LlamaConfig = serde_json::from_slice(&raw_config)?;
        let config = config.into_config(false);

        let device = Device::cuda_if_available(0)
            .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;
        let dtype = if device.is_cuda() { DType::F16 } else { DType::F32 };
        info!(cuda = device.is_cuda(), shards = weights.len(), "loading weights");

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device) }
            .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;
        let model = Llama::load(vb, &config).map_err(|e| PersonaError::ModelLoad(e.to_string()))?;

        let eos_tokens = config
            .eos_token_id
            .clone()
            .or_else(|| tokenizer.token_to_id("</s>").map(LlamaEosToks::Single));

        info!("roleplay model loaded");
        Ok(Self {
            model,
            tokenizer,
            config,
            device,
            dtype,
            eos_tokens,
        })
    }

    fn is_eos(&self, token: u32) -> bool {
        match &self.eos_tokens {
            Some(LlamaEosToks::Single(id)) => token == *id,
            Some(LlamaEosToks::Multiple(ids)) => ids.contains(&token),
            None => false,
        }
    }

    /// Sampling loop shared by both generation modes. Only freshly generated
    /// text is decoded, so the prompt is never echoed back.
    fn run_generation(&self, prompt: &str, on_token: &mut dyn FnMut(&str)) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| inference(&e))?;
        let mut tokens = encoding.get_ids().to_vec();
        if tokens.is_empty() {
            return Err(PersonaError::Inference("prompt tokenized to nothing".to_string()));
        }
        let prompt_len = tokens.len();

        // Fresh KV cache per request; concurrent generations share only the
        // immutable weights.
        let mut cache = Cache::new(true, self.dtype, &self.config, &self.device)
            .map_err(|e| inference(&e))?;
        let seed: u64 = rand::thread_rng().gen();
        let mut logits_processor = LogitsProcessor::new(seed, Some(TEMPERATURE), Some(TOP_P));
        let mut decoder = StreamDecoder::default();
        let mut output = String::new();
        let mut index_pos = 0;

        for index in 0..MAX_NEW_TOKENS {
            let (context_size, context_index) = if index > 0 {
                (1, index_pos)
            } else {
                (tokens.len(), 0)
            };
            let context = &tokens[tokens.len() - context_size..];

            let input = Tensor::new(context, &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| inference(&e))?;
            let logits = self
                .model
                .forward(&input, context_index, &mut cache)
                .map_err(|e| inference(&e))?;
            let logits = logits
                .squeeze(0)
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(|e| inference(&e))?;
            let logits = apply_repeat_penalty(&logits, REPEAT_PENALTY, &tokens)
                .map_err(|e| inference(&e))?;
            index_pos += context.len();

            let next_token = logits_processor.sample(&logits).map_err(|e| inference(&e))?;
            tokens.push(next_token);

            if self.is_eos(next_token) {
                break;
            }

            if let Some(fragment) = decoder.next_fragment(&self.tokenizer, next_token)? {
                output.push_str(&fragment);
                on_token(&fragment);
            }
        }

        if let Some(rest) = decoder.rest(&self.tokenizer)? {
            output.push_str(&rest);
            on_token(&rest);
        }

        debug!(
            prompt_tokens = prompt_len,
            generated_tokens = tokens.len() - prompt_len,
            "generation finished"
        );
        Ok(output)
    }
}

impl TextGenerator for RoleplayModel {
    fn generate(&self, prompt: &str) -> Result<String> {
        let output = self.run_generation(prompt, &mut |_| {})?;
        Ok(output.trim().to_string())
    }

    fn generate_streaming(&self, prompt: &str, on_token: &mut dyn FnMut(&str)) -> Result<String> {
        self.run_generation(prompt, on_token)
    }
}

fn inference(e: &dyn std::fmt::Display) -> PersonaError {
    PersonaError::Inference(e.to_string())
}

/// Incremental detokenizer over generated tokens only.
///
/// Withholds fragments that end mid-codepoint (or mid-word of a multi-token
/// piece) until a later token completes them.
#[derive(Default)]
struct StreamDecoder {
    tokens: Vec<u32>,
    prev_index: usize,
    current_index: usize,
}

impl StreamDecoder {
    fn decode(&self, tokenizer: &Tokenizer, tokens: &[u32]) -> Result<String> {
        tokenizer
            .decode(tokens, true)
            .map_err(|e| PersonaError::Inference(e.to_string()))
    }

    fn next_fragment(&mut self, tokenizer: &Tokenizer, token: u32) -> Result<Option<String>> {
        let prev_text = if self.tokens.is_empty() {
            String::new()
        } else {
            self.decode(tokenizer, &self.tokens[self.prev_index..self.current_index])?
        };

        self.tokens.push(token);
        let text = self.decode(tokenizer, &self.tokens[self.prev_index..])?;

        if text.len() > prev_text.len()
            && text.chars().last().is_some_and(|c| c.is_alphanumeric())
        {
            let fragment = text[prev_text.len()..].to_string();
            self.prev_index = self.current_index;
            self.current_index = self.tokens.len();
            Ok(Some(fragment))
        } else {
            Ok(None)
        }
    }

    fn rest(&self, tokenizer: &Tokenizer) -> Result<Option<String>> {
        if self.tokens.is_empty() {
            return Ok(None);
        }
        let prev_text = self.decode(tokenizer, &self.tokens[self.prev_index..self.current_index])?;
        let text = self.decode(tokenizer, &self.tokens[self.prev_index..])?;
        if text.len() > prev_text.len() {
            Ok(Some(text[prev_text.len()..].to_string()))
        } else {
            Ok(None)
        }
    }
}
