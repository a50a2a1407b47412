//! Emotion tagging for user messages.
//!
//! Wraps a local DistilBERT text-classification checkpoint. The feature is
//! strictly optional: a missing or broken checkpoint degrades every call to
//! "neutral" instead of failing the process.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};
use candle_transformers::models::distilbert::{Config, DistilBertModel};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::error::{PersonaError, Result};

pub const NEUTRAL_EMOTION: &str = "neutral";

const REQUIRED_FILES: [&str; 3] = ["config.json", "tokenizer.json", "model.safetensors"];

pub struct EmotionClassifier {
    inner: Option<EmotionModel>,
}

struct EmotionModel {
    tokenizer: Tokenizer,
    model: DistilBertModel,
    pre_classifier: Linear,
    classifier: Linear,
    labels: HashMap<u32, String>,
    device: Device,
}

impl EmotionClassifier {
    /// Load the classifier, degrading to a disabled instance on any failure.
    pub fn load(dir: &Path) -> Self {
        match EmotionModel::load(dir) {
            Ok(model) => {
                info!(dir = %dir.display(), labels = model.labels.len(), "emotion classifier loaded");
                Self { inner: Some(model) }
            }
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "emotion classifier unavailable");
                Self { inner: None }
            }
        }
    }

    /// A classifier that always answers "neutral".
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Label `text` with its dominant emotion.
    ///
    /// Blank input, a disabled classifier, and runtime errors all yield
    /// "neutral".
    pub fn detect(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return NEUTRAL_EMOTION.to_string();
        }
        let Some(model) = &self.inner else {
            return NEUTRAL_EMOTION.to_string();
        };
        match model.classify(text) {
            Ok(label) => label.to_lowercase(),
            Err(e) => {
                warn!(error = %e, "emotion detection failed");
                NEUTRAL_EMOTION.to_string()
            }
        }
    }
}

impl EmotionModel {
    fn load(dir: &Path) -> Result<Self> {
        for file in REQUIRED_FILES {
            if !dir.join(file).exists() {
                return Err(PersonaError::ModelLoad(format!(
                    "emotion model file not found: {}",
                    dir.join(file).display()
                )));
            }
        }

        let raw_config = std::fs::read_to_string(dir.join("config.json"))?;
        let config: Config = serde_json::from_str(&raw_config)?;
        let raw: serde_json::Value = serde_json::from_str(&raw_config)?;

        let dim = raw
            .get("dim")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| PersonaError::ModelLoad("config.json missing dim".to_string()))?
            as usize;
        let labels = parse_labels(&raw);
        if labels.is_empty() {
            return Err(PersonaError::ModelLoad(
                "config.json missing id2label".to_string(),
            ));
        }

        let tokenizer = Tokenizer::from_file(dir.join("tokenizer.json"))
            .map_err(|e| PersonaError::ModelLoad(format!("tokenizer: {}", e)))?;

        let device = Device::Cpu;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[dir.join("model.safetensors")], DType::F32, &device)
        }
        .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;

        // Checkpoints exported from sequence-classification heads prefix the
        // backbone with `distilbert.`; bare exports do not.
        let model = DistilBertModel::load(vb.pp("distilbert"), &config)
            .or_else(|_| DistilBertModel::load(vb.clone(), &config))
            .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;

        let pre_classifier = linear(dim, dim, vb.pp("pre_classifier"))
            .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;
        let classifier = linear(dim, labels.len(), vb.pp("classifier"))
            .map_err(|e| PersonaError::ModelLoad(e.to_string()))?;

        Ok(Self {
            tokenizer,
            model,
            pre_classifier,
            classifier,
            labels,
            device,
        })
    }

    fn classify(&self, text: &str) -> Result<String> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| PersonaError::Inference(e.to_string()))?;
        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Ok(NEUTRAL_EMOTION.to_string());
        }

        let top = self
            .top_label_index(ids)
            .map_err(|e| PersonaError::Inference(e.to_string()))?;

        Ok(self
            .labels
            .get(&top)
            .cloned()
            .unwrap_or_else(|| NEUTRAL_EMOTION.to_string()))
    }

    fn top_label_index(&self, ids: &[u32]) -> candle_core::Result<u32> {
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let mask = attention_mask(ids.len(), &self.device)?;

        let hidden = self.model.forward(&input, &mask)?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pre_classifier.forward(&cls)?.relu()?;
        let logits = self.classifier.forward(&pooled)?;

        logits.squeeze(0)?.argmax(0)?.to_scalar::<u32>()
    }
}

fn attention_mask(size: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<u8> = (0..size)
        .flat_map(|i| (0..size).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (size, size), device)
}

fn parse_labels(config: &serde_json::Value) -> HashMap<u32, String> {
    config
        .get("id2label")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let id = k.parse::<u32>().ok()?;
                    let label = v.as_str()?.to_string();
                    Some((id, label))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_input_is_neutral() {
        let classifier = EmotionClassifier::disabled();
        assert_eq!(classifier.detect(""), NEUTRAL_EMOTION);
        assert_eq!(classifier.detect("   \t\n"), NEUTRAL_EMOTION);
    }

    #[test]
    fn test_disabled_classifier_is_neutral_for_any_input() {
        let classifier = EmotionClassifier::disabled();
        assert_eq!(classifier.detect("I am absolutely thrilled!"), NEUTRAL_EMOTION);
    }

    #[test]
    fn test_load_from_missing_dir_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = EmotionClassifier::load(&dir.path().join("nope"));
        assert_eq!(classifier.detect("hello"), NEUTRAL_EMOTION);
    }

    #[test]
    fn test_parse_labels() {
        let config: serde_json::Value = serde_json::from_str(
            r#"{"id2label": {"0": "anger", "1": "Joy"}, "dim": 768}"#,
        )
        .unwrap();
        let labels = parse_labels(&config);
        assert_eq!(labels.get(&0).map(|s| s.as_str()), Some("anger"));
        assert_eq!(labels.get(&1).map(|s| s.as_str()), Some("Joy"));
    }
}
