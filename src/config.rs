//! Configuration module for the embedding explorer.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//! - CLI argument overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `ES_` and use double underscores
//! to separate nested levels:
//! - `ES_INDEX__NLIST=64` sets `index.nlist`
//! - `ES_PROJECTION__N_NEIGHBORS=30` sets `projection.n_neighbors`
//! - `ES_ENCODERS__SOURCE_LANG=fra_Latn` sets `encoders.source_lang`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR: &str = ".embedscope";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Workspace root directory (where .embedscope is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default = "default_false")]
    pub debug: bool,

    /// Artifact locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Embed job settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// ANN index build and search settings
    #[serde(default)]
    pub index: IndexConfig,

    /// 2D projection and clustering settings
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Encoder models per modality
    #[serde(default)]
    pub encoders: EncoderSettings,

    /// Query defaults
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PathsConfig {
    /// Directory holding embedding shards
    #[serde(default = "default_embeddings_dir")]
    pub embeddings_dir: PathBuf,

    /// Tab-separated record table, one row per ordinal
    #[serde(default = "default_records_file")]
    pub records_file: PathBuf,

    /// Persisted ANN index
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Persisted `[N, 3]` projection points
    #[serde(default = "default_points_file")]
    pub points_file: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IngestConfig {
    /// Rows per shard (and per record-table append)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Inputs per encoder call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Rows sampled without replacement for quantizer training
    #[serde(default = "default_training_size")]
    pub training_size: usize,

    /// Number of coarse cells
    #[serde(default = "default_nlist")]
    pub nlist: usize,

    /// PQ sub-quantizers; must divide the embedding dimension
    #[serde(default = "default_subquantizers")]
    pub subquantizers: usize,

    /// Bits per sub-quantizer code (1..=8)
    #[serde(default = "default_bits")]
    pub bits: u32,

    /// OPQ rotation rounds, 0 disables the rotation
    #[serde(default = "default_opq_iterations")]
    pub opq_iterations: usize,

    /// Lloyd iterations for coarse and residual k-means
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Cells searched per query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,

    /// Seed for training-set sampling and k-means
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Use an accelerator when one reports itself available
    #[serde(default = "default_true")]
    pub use_accelerator: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProjectionConfig {
    /// Neighborhood size of the kNN graph
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,

    /// Output dimensionality
    #[serde(default = "default_n_components")]
    pub n_components: usize,

    #[serde(default = "default_min_dist")]
    pub min_dist: f32,

    #[serde(default = "default_spread")]
    pub spread: f32,

    /// Optimization epochs; unset picks 500 for small datasets, 200 otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_epochs: Option<usize>,

    #[serde(default = "default_negative_sample_rate")]
    pub negative_sample_rate: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Per-axis target range, unset keeps raw coordinates
    #[serde(default = "default_rescale", skip_serializing_if = "Option::is_none")]
    pub rescale: Option<[f32; 2]>,

    #[serde(default)]
    pub clustering: ClusteringConfig,
}

/// Clustering applied to the projected points.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ClusteringConfig {
    /// Every point gets cluster 0
    None,
    /// DBSCAN over the 2D points; noise becomes one trailing cluster
    Density { eps: f32, min_samples: usize },
    /// k-means with a fixed cluster count
    Centroid { clusters: usize },
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        ClusteringConfig::Density {
            eps: 0.05,
            min_samples: 10,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EncoderSettings {
    /// fastembed text model name
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// fastembed image model name
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Speech encoder name, served only by an injected factory
    #[serde(default = "default_audio_model")]
    pub audio_model: String,

    /// Output dimension of the speech encoder
    #[serde(default = "default_audio_dimension")]
    pub audio_dimension: usize,

    /// Model download cache, defaults to the user cache directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Source language used when a query does not name one
    #[serde(default = "default_source_lang")]
    pub source_lang: String,

    #[serde(default = "default_false")]
    pub show_download_progress: bool,
}

impl EncoderSettings {
    /// Configured cache directory, or `<user cache>/embedscope/models`.
    #[must_use]
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|dir| dir.join("embedscope").join("models"))
                .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Results returned when the caller does not pass k
    #[serde(default = "default_k")]
    pub default_k: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_embeddings_dir() -> PathBuf {
    PathBuf::from(".embedscope/data/embeddings")
}
fn default_records_file() -> PathBuf {
    PathBuf::from(".embedscope/data/data_chunk.tsv")
}
fn default_index_file() -> PathBuf {
    PathBuf::from(".embedscope/index/index.bin")
}
fn default_points_file() -> PathBuf {
    PathBuf::from(".embedscope/projection/points.bin")
}
fn default_chunk_size() -> usize {
    1000
}
fn default_batch_size() -> usize {
    32
}
fn default_training_size() -> usize {
    10_000
}
fn default_nlist() -> usize {
    256
}
fn default_subquantizers() -> usize {
    16
}
fn default_bits() -> u32 {
    8
}
fn default_opq_iterations() -> usize {
    8
}
fn default_kmeans_iterations() -> usize {
    25
}
fn default_nprobe() -> usize {
    16
}
fn default_seed() -> u64 {
    42
}
fn default_n_neighbors() -> usize {
    15
}
fn default_n_components() -> usize {
    2
}
fn default_min_dist() -> f32 {
    0.1
}
fn default_spread() -> f32 {
    1.0
}
fn default_negative_sample_rate() -> usize {
    5
}
fn default_learning_rate() -> f32 {
    1.0
}
fn default_rescale() -> Option<[f32; 2]> {
    Some([-1.0, 1.0])
}
fn default_text_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_image_model() -> String {
    "ClipVitB32".to_string()
}
fn default_audio_model() -> String {
    "sonar_speech_encoder_eng".to_string()
}
fn default_audio_dimension() -> usize {
    1024
}
fn default_source_lang() -> String {
    "eng_Latn".to_string()
}
fn default_k() -> usize {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            debug: false,
            paths: PathsConfig::default(),
            ingest: IngestConfig::default(),
            index: IndexConfig::default(),
            projection: ProjectionConfig::default(),
            encoders: EncoderSettings::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            embeddings_dir: default_embeddings_dir(),
            records_file: default_records_file(),
            index_file: default_index_file(),
            points_file: default_points_file(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            training_size: default_training_size(),
            nlist: default_nlist(),
            subquantizers: default_subquantizers(),
            bits: default_bits(),
            opq_iterations: default_opq_iterations(),
            kmeans_iterations: default_kmeans_iterations(),
            nprobe: default_nprobe(),
            seed: default_seed(),
            use_accelerator: true,
        }
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            n_neighbors: default_n_neighbors(),
            n_components: default_n_components(),
            min_dist: default_min_dist(),
            spread: default_spread(),
            n_epochs: None,
            negative_sample_rate: default_negative_sample_rate(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
            rescale: default_rescale(),
            clustering: ClusteringConfig::default(),
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            text_model: default_text_model(),
            image_model: default_image_model(),
            audio_model: default_audio_model(),
            audio_dimension: default_audio_dimension(),
            cache_dir: None,
            source_lang: default_source_lang(),
            show_download_progress: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { default_k: default_k() }
    }
}

/// Maps `ES_SECTION__FIELD` to `section.field`.
fn env_provider() -> Env {
    Env::prefixed("ES_").map(|key| {
        key.as_str()
            .to_lowercase()
            .replace("__", ".") // Double underscore becomes dot
            .into()
    })
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .embedscope directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(env_provider())
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Find the workspace config by looking for a .embedscope directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .embedscope is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.exists() && config_dir.is_dir() {
                return Some(ancestor.to_path_buf());
            }
        }

        None
    }

    /// Load configuration from a specific file
    ///
    /// Relative paths resolve against the workspace holding the file: the
    /// parent of `.embedscope` when the file lives there, else the file's
    /// own directory.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        let path = path.as_ref();
        let mut settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(env_provider())
            .extract()
            .map_err(Box::new)?;
        if settings.workspace_root.is_none() {
            settings.workspace_root = Some(Self::root_for_config(path));
        }
        Ok(settings)
    }

    fn root_for_config(path: &Path) -> PathBuf {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        if dir.file_name().is_some_and(|name| name == CONFIG_DIR) {
            dir.parent().unwrap_or(dir).to_path_buf()
        } else {
            dir.to_path_buf()
        }
    }

    /// Resolves a configured path against the workspace root.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// All artifact paths resolved against the workspace root.
    #[must_use]
    pub fn resolved_paths(&self) -> PathsConfig {
        PathsConfig {
            embeddings_dir: self.resolve(&self.paths.embeddings_dir),
            records_file: self.resolve(&self.paths.records_file),
            index_file: self.resolve(&self.paths.index_file),
            points_file: self.resolve(&self.paths.points_file),
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, Self::template())?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Ok(config_path)
    }

    fn template() -> String {
        format!(
            r#"# Embedscope Configuration File

# Version of the configuration schema
version = 1

# Global debug mode
debug = false

[paths]
# All paths are relative to the workspace root
embeddings_dir = ".embedscope/data/embeddings"
records_file = ".embedscope/data/data_chunk.tsv"
index_file = ".embedscope/index/index.bin"
points_file = ".embedscope/projection/points.bin"

[ingest]
# Rows per shard; each shard is paired with one record-table append
chunk_size = 1000
# Inputs per encoder call
batch_size = 32

[index]
# Rows sampled for quantizer training
training_size = 10000
# Coarse cells (IVF)
nlist = 256
# PQ sub-quantizers, must divide the embedding dimension
subquantizers = 16
# Bits per sub-quantizer code (1-8)
bits = 8
# OPQ rotation rounds (0 disables the rotation)
opq_iterations = 8
kmeans_iterations = 25
# Cells searched per query: higher is slower but more accurate
nprobe = 16
seed = 42
use_accelerator = true

[projection]
n_neighbors = 15
n_components = 2
min_dist = 0.1
spread = 1.0
# n_epochs = 500
negative_sample_rate = 5
learning_rate = 1.0
seed = 42
rescale = [-1.0, 1.0]

[projection.clustering]
# "none", "density" (eps, min_samples) or "centroid" (clusters)
method = "density"
eps = 0.05
min_samples = 10

[encoders]
text_model = "AllMiniLML6V2"
image_model = "ClipVitB32"
# Audio needs a speech encoder supplied by the embedding host
audio_model = "sonar_speech_encoder_eng"
audio_dimension = 1024
# cache_dir = "{}"
source_lang = "eng_Latn"
show_download_progress = false

[search]
default_k = 5
"#,
            EncoderSettings::default().resolved_cache_dir().display()
        )
    }
}
