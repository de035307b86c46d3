use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Provider id that selects the in-process hashing embedder instead of an HTTP endpoint.
pub const LOCAL_EMBEDDING_PROVIDER: &str = "local";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub chunking: Chunking,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub memory: Memory,
	pub corpus: Option<Corpus>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
	pub vector_dim: u32,
	#[serde(default)]
	pub index_a: IndexA,
	#[serde(default)]
	pub index_b: IndexB,
	#[serde(default)]
	pub sessions: Sessions,
	pub postgres: Option<Postgres>,
	pub qdrant: Option<Qdrant>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseBackend {
	#[default]
	Memory,
	Qdrant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
	#[default]
	Memory,
	Postgres,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexA {
	pub backend: DenseBackend,
	/// In-memory backend only. Reloaded at start and rewritten after every mutation.
	pub snapshot_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexB {
	pub backend: StoreBackend,
	/// In-memory backend only. Reloaded at start and rewritten after every mutation.
	pub snapshot_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Sessions {
	pub backend: StoreBackend,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	#[serde(default = "default_pool_max_conns")]
	pub pool_max_conns: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub completion: CompletionProviderConfig,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	#[serde(default)]
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	#[serde(default = "default_embedding_path")]
	pub path: String,
	#[serde(default)]
	pub model: String,
	pub dimensions: u32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}
impl EmbeddingProviderConfig {
	pub fn is_local(&self) -> bool {
		self.provider_id == LOCAL_EMBEDDING_PROVIDER
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompletionProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	#[serde(default = "default_completion_path")]
	pub path: String,
	pub model: String,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Chunking {
	pub window_tokens: u32,
	pub overlap_fraction: f32,
}
impl Default for Chunking {
	fn default() -> Self {
		Self { window_tokens: 200, overlap_fraction: 0.15 }
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub top_k: u32,
	pub max_top_k: u32,
	/// Each index is searched for `top_k * overfetch_factor` candidates before fusion.
	pub overfetch_factor: u32,
	pub weight_a: f32,
	pub weight_b: f32,
	pub timeout_ms: u64,
	/// Hits whose fused score falls below this value are neither returned nor cited.
	pub min_fused_score: Option<f32>,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			top_k: 4,
			max_top_k: 50,
			overfetch_factor: 2,
			weight_a: 0.5,
			weight_b: 0.5,
			timeout_ms: 5_000,
			min_fused_score: None,
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Memory {
	pub window_turns: u32,
	pub window_minutes: Option<u64>,
	/// Most recent turns placed in the completion prompt.
	pub prompt_turns: u32,
	/// Zero disables the background sweep. On-write trimming still applies.
	pub sweep_interval_secs: u64,
}
impl Default for Memory {
	fn default() -> Self {
		Self { window_turns: 20, window_minutes: None, prompt_turns: 10, sweep_interval_secs: 60 }
	}
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Corpus {
	pub sox_dir: Option<PathBuf>,
	pub public_sec_dir: Option<PathBuf>,
	pub private_sec_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_pool_max_conns() -> u32 {
	10
}

fn default_embedding_path() -> String {
	"/embeddings".to_string()
}

fn default_completion_path() -> String {
	"/chat/completions".to_string()
}

fn default_timeout_ms() -> u64 {
	30_000
}

fn default_temperature() -> f32 {
	0.2
}
