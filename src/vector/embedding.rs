//! Encoder capability: turns a query or dataset item into a vector.
//!
//! Text, image and audio each have an [`EncoderSpec`] variant carrying its
//! construction parameters; video has none and is rejected with
//! `UnsupportedModality` before any model is loaded. Whether a spec can be
//! served is up to the [`EncoderFactory`]: fastembed covers text and image,
//! while a speech encoder has to be injected. Tests and the search context
//! inject [`MockEncoder`]s the same way.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::EncoderSettings;
use crate::error::{ExplorerError, ExplorerResult};
use crate::types::Modality;
use crate::vector::VectorDimension;

/// Produces embeddings for one modality.
///
/// Implementations must be thread-safe; the search context shares one
/// instance per modality across all requests.
pub trait Encoder: Send + Sync {
    fn modality(&self) -> Modality;

    /// Dimension of every vector this encoder returns.
    fn dimension(&self) -> VectorDimension;

    /// Embeds a batch of inputs (text or media paths).
    ///
    /// May return fewer vectors than inputs when the model produces no
    /// output; callers treat that as a failure.
    fn embed_batch(&self, inputs: &[&str], source_lang: &str) -> ExplorerResult<Vec<Vec<f32>>>;

    /// Embeds a single input.
    fn embed(&self, input: &str, source_lang: &str) -> ExplorerResult<Vec<f32>> {
        let vector = self
            .embed_batch(&[input], source_lang)?
            .into_iter()
            .next()
            .ok_or_else(|| ExplorerError::EmbeddingFailure {
                modality: self.modality().to_string(),
                reason: "encoder returned no output".to_string(),
            })?;
        self.dimension().validate_vector(&vector)?;
        Ok(vector)
    }
}

/// Construction parameters for one encoder, one variant per supported modality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderSpec {
    Text {
        model: String,
        cache_dir: PathBuf,
        show_download_progress: bool,
    },
    Image {
        model: String,
        cache_dir: PathBuf,
        show_download_progress: bool,
    },
    /// Speech-to-embedding model; needs an injected factory.
    Audio { model: String, dimension: usize },
}

impl EncoderSpec {
    /// Resolves the encoder parameters for `modality`.
    ///
    /// # Errors
    /// `UnsupportedModality` for video.
    pub fn for_modality(modality: Modality, settings: &EncoderSettings) -> ExplorerResult<Self> {
        let cache_dir = settings.resolved_cache_dir();
        match modality {
            Modality::Text => Ok(EncoderSpec::Text {
                model: settings.text_model.clone(),
                cache_dir,
                show_download_progress: settings.show_download_progress,
            }),
            Modality::Image => Ok(EncoderSpec::Image {
                model: settings.image_model.clone(),
                cache_dir,
                show_download_progress: settings.show_download_progress,
            }),
            Modality::Audio => Ok(EncoderSpec::Audio {
                model: settings.audio_model.clone(),
                dimension: settings.audio_dimension,
            }),
            Modality::Video => Err(ExplorerError::UnsupportedModality {
                modality: modality.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn modality(&self) -> Modality {
        match self {
            EncoderSpec::Text { .. } => Modality::Text,
            EncoderSpec::Image { .. } => Modality::Image,
            EncoderSpec::Audio { .. } => Modality::Audio,
        }
    }
}

/// Builds encoders from specs.
pub trait EncoderFactory: Send + Sync {
    fn create(&self, spec: &EncoderSpec) -> ExplorerResult<Arc<dyn Encoder>>;
}

/// Parses a text model name such as `AllMiniLML6V2`.
pub fn parse_text_model(name: &str) -> ExplorerResult<(EmbeddingModel, usize)> {
    let model = match name {
        "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "AllMiniLML12V2" => (EmbeddingModel::AllMiniLML12V2, 384),
        "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
        "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
        "BGELargeENV15" => (EmbeddingModel::BGELargeENV15, 1024),
        "MultilingualE5Small" => (EmbeddingModel::MultilingualE5Small, 384),
        "MultilingualE5Base" => (EmbeddingModel::MultilingualE5Base, 768),
        "MultilingualE5Large" => (EmbeddingModel::MultilingualE5Large, 1024),
        "ParaphraseMLMiniLML12V2" => (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
        "NomicEmbedTextV15" => (EmbeddingModel::NomicEmbedTextV15, 768),
        other => {
            return Err(ExplorerError::Configuration {
                reason: format!(
                    "unknown text model '{other}'. Try AllMiniLML6V2, MultilingualE5Small or BGEBaseENV15"
                ),
            });
        }
    };
    Ok(model)
}

/// Parses an image model name such as `ClipVitB32`.
pub fn parse_image_model(name: &str) -> ExplorerResult<ImageEmbeddingModel> {
    match name {
        "ClipVitB32" => Ok(ImageEmbeddingModel::ClipVitB32),
        "Resnet50" => Ok(ImageEmbeddingModel::Resnet50),
        "UnicomVitB16" => Ok(ImageEmbeddingModel::UnicomVitB16),
        "UnicomVitB32" => Ok(ImageEmbeddingModel::UnicomVitB32),
        "NomicEmbedVisionV15" => Ok(ImageEmbeddingModel::NomicEmbedVisionV15),
        other => Err(ExplorerError::Configuration {
            reason: format!("unknown image model '{other}'. Try ClipVitB32 or Resnet50"),
        }),
    }
}

/// Output dimension of an image model.
#[must_use]
pub fn image_model_dimension(model: &ImageEmbeddingModel) -> usize {
    match model {
        ImageEmbeddingModel::ClipVitB32 => 512,
        ImageEmbeddingModel::Resnet50 => 2048,
        ImageEmbeddingModel::UnicomVitB16 => 768,
        ImageEmbeddingModel::UnicomVitB32 => 512,
        ImageEmbeddingModel::NomicEmbedVisionV15 => 768,
        _ => 512,
    }
}

/// Display name of a fastembed model.
#[must_use]
pub fn model_to_string<M: std::fmt::Debug>(model: &M) -> String {
    format!("{model:?}")
}

fn init_failure(modality: Modality, model: &str, e: impl std::fmt::Display) -> ExplorerError {
    ExplorerError::EmbeddingFailure {
        modality: modality.to_string(),
        reason: format!(
            "failed to initialize model {model}: {e}. Ensure you have internet connection for first-time model download"
        ),
    }
}

fn check_batch(
    modality: Modality,
    dimension: VectorDimension,
    embeddings: &[Vec<f32>],
) -> ExplorerResult<()> {
    for embedding in embeddings {
        if embedding.len() != dimension.get() {
            return Err(ExplorerError::EmbeddingFailure {
                modality: modality.to_string(),
                reason: format!(
                    "model returned a {}-dimensional vector, expected {dimension}",
                    embedding.len()
                ),
            });
        }
    }
    Ok(())
}

/// Sentence encoder backed by a fastembed text model.
pub struct FastEmbedTextEncoder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl FastEmbedTextEncoder {
    pub fn new(model_name: &str, cache_dir: PathBuf, show_download_progress: bool) -> ExplorerResult<Self> {
        let (model, dim) = parse_text_model(model_name)?;
        let embedding = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| init_failure(Modality::Text, model_name, e))?;

        tracing::info!("Loaded text encoder {model_name} ({dim} dimensions)");

        Ok(Self {
            model: Mutex::new(embedding),
            model_name: model_name.to_string(),
            dimension: VectorDimension::new(dim)?,
        })
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Encoder for FastEmbedTextEncoder {
    fn modality(&self) -> Modality {
        Modality::Text
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[&str], source_lang: &str) -> ExplorerResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        tracing::trace!("embedding {} texts (source_lang={source_lang})", inputs.len());

        let texts: Vec<String> = inputs.iter().map(|&s| s.to_string()).collect();
        let embeddings = self
            .model
            .lock()
            .map_err(|_| ExplorerError::EmbeddingFailure {
                modality: Modality::Text.to_string(),
                reason: "failed to acquire embedding model lock - model may be poisoned".to_string(),
            })?
            .embed(texts, None)
            .map_err(|e| ExplorerError::EmbeddingFailure {
                modality: Modality::Text.to_string(),
                reason: e.to_string(),
            })?;

        check_batch(Modality::Text, self.dimension, &embeddings)?;
        Ok(embeddings)
    }
}

/// Image encoder backed by a fastembed vision model. Inputs are file paths.
pub struct FastEmbedImageEncoder {
    model: Mutex<ImageEmbedding>,
    dimension: VectorDimension,
}

impl FastEmbedImageEncoder {
    pub fn new(model_name: &str, cache_dir: PathBuf, show_download_progress: bool) -> ExplorerResult<Self> {
        let model = parse_image_model(model_name)?;
        let dim = image_model_dimension(&model);
        let embedding = ImageEmbedding::try_new(
            ImageInitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| init_failure(Modality::Image, model_name, e))?;

        tracing::info!("Loaded image encoder {model_name} ({dim} dimensions)");

        Ok(Self {
            model: Mutex::new(embedding),
            dimension: VectorDimension::new(dim)?,
        })
    }
}

impl Encoder for FastEmbedImageEncoder {
    fn modality(&self) -> Modality {
        Modality::Image
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[&str], _source_lang: &str) -> ExplorerResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let paths: Vec<String> = inputs.iter().map(|&s| s.to_string()).collect();
        let embeddings = self
            .model
            .lock()
            .map_err(|_| ExplorerError::EmbeddingFailure {
                modality: Modality::Image.to_string(),
                reason: "failed to acquire embedding model lock - model may be poisoned".to_string(),
            })?
            .embed(paths, None)
            .map_err(|e| ExplorerError::EmbeddingFailure {
                modality: Modality::Image.to_string(),
                reason: e.to_string(),
            })?;

        check_batch(Modality::Image, self.dimension, &embeddings)?;
        Ok(embeddings)
    }
}

/// Factory for the fastembed-backed encoders.
#[derive(Debug, Default, Clone, Copy)]
pub struct FastEmbedFactory;

impl EncoderFactory for FastEmbedFactory {
    fn create(&self, spec: &EncoderSpec) -> ExplorerResult<Arc<dyn Encoder>> {
        match spec {
            EncoderSpec::Text {
                model,
                cache_dir,
                show_download_progress,
            } => Ok(Arc::new(FastEmbedTextEncoder::new(
                model,
                cache_dir.clone(),
                *show_download_progress,
            )?)),
            EncoderSpec::Image {
                model,
                cache_dir,
                show_download_progress,
            } => Ok(Arc::new(FastEmbedImageEncoder::new(
                model,
                cache_dir.clone(),
                *show_download_progress,
            )?)),
            EncoderSpec::Audio { model, .. } => {
                tracing::warn!("No bundled speech encoder for audio model '{model}'");
                Err(ExplorerError::UnsupportedModality {
                    modality: Modality::Audio.to_string(),
                })
            }
        }
    }
}

/// Deterministic encoder for tests and offline runs.
///
/// Unknown inputs hash to a pseudo-random, unnormalized vector; inputs
/// registered with [`MockEncoder::with_fixed`] return their exact vector.
#[derive(Debug, Clone)]
pub struct MockEncoder {
    modality: Modality,
    dimension: VectorDimension,
    fixed: HashMap<String, Vec<f32>>,
    silent: bool,
}

impl MockEncoder {
    #[must_use]
    pub fn new(modality: Modality, dimension: VectorDimension) -> Self {
        Self {
            modality,
            dimension,
            fixed: HashMap::new(),
            silent: false,
        }
    }

    /// Returns `vector` whenever `input` is embedded.
    #[must_use]
    pub fn with_fixed(mut self, input: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed.insert(input.into(), vector);
        self
    }

    /// Makes the encoder produce no output at all.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    fn hashed_vector(&self, input: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        input.hash(&mut hasher);
        let mut rng = StdRng::seed_from_u64(hasher.finish());
        (0..self.dimension.get())
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect()
    }
}

impl Encoder for MockEncoder {
    fn modality(&self) -> Modality {
        self.modality
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn embed_batch(&self, inputs: &[&str], _source_lang: &str) -> ExplorerResult<Vec<Vec<f32>>> {
        if self.silent {
            return Ok(Vec::new());
        }
        Ok(inputs
            .iter()
            .map(|&input| {
                self.fixed
                    .get(input)
                    .cloned()
                    .unwrap_or_else(|| self.hashed_vector(input))
            })
            .collect())
    }
}

/// Factory handing out clones of preconfigured [`MockEncoder`]s.
///
/// Counts how many encoders it has built so tests can assert that the
/// search context loads each modality only once.
#[derive(Debug, Default)]
pub struct MockEncoderFactory {
    encoders: HashMap<Modality, MockEncoder>,
    created: AtomicUsize,
}

impl MockEncoderFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_encoder(mut self, encoder: MockEncoder) -> Self {
        self.encoders.insert(encoder.modality(), encoder);
        self
    }

    /// Number of encoders created so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EncoderFactory for MockEncoderFactory {
    fn create(&self, spec: &EncoderSpec) -> ExplorerResult<Arc<dyn Encoder>> {
        let modality = spec.modality();
        let encoder = self
            .encoders
            .get(&modality)
            .cloned()
            .ok_or_else(|| ExplorerError::UnsupportedModality {
                modality: modality.to_string(),
            })?;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(encoder))
    }
}
