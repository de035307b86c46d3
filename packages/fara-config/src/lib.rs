mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Chunking, CompletionProviderConfig, Config, Corpus, DenseBackend, EmbeddingProviderConfig,
	IndexA, IndexB, LOCAL_EMBEDDING_PROVIDER, Memory, Postgres, Providers, Qdrant, Retrieval,
	Service, Sessions, Storage, StoreBackend,
};

use std::{fs, net::SocketAddr, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}

	let admin_addr: SocketAddr = cfg.service.admin_bind.parse().map_err(|_| Error::Validation {
		message: "service.admin_bind must be a socket address.".to_string(),
	})?;

	if !admin_addr.ip().is_loopback() {
		return Err(Error::Validation {
			message: "service.admin_bind must be a loopback address.".to_string(),
		});
	}
	if cfg.storage.vector_dim == 0 {
		return Err(Error::Validation {
			message: "storage.vector_dim must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.vector_dim.".to_string(),
		});
	}
	if cfg.storage.index_a.backend == DenseBackend::Qdrant && cfg.storage.qdrant.is_none() {
		return Err(Error::Validation {
			message: "storage.qdrant is required when storage.index_a.backend is qdrant."
				.to_string(),
		});
	}
	if cfg.storage.postgres.is_none()
		&& (cfg.storage.index_b.backend == StoreBackend::Postgres
			|| cfg.storage.sessions.backend == StoreBackend::Postgres)
	{
		return Err(Error::Validation {
			message: "storage.postgres is required when a postgres backend is selected."
				.to_string(),
		});
	}
	if let Some(postgres) = cfg.storage.postgres.as_ref() {
		if postgres.dsn.trim().is_empty() {
			return Err(Error::Validation {
				message: "storage.postgres.dsn must be non-empty.".to_string(),
			});
		}
		if postgres.pool_max_conns == 0 {
			return Err(Error::Validation {
				message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
			});
		}
	}
	if let Some(qdrant) = cfg.storage.qdrant.as_ref() {
		for (label, value) in
			[("storage.qdrant.url", &qdrant.url), ("storage.qdrant.collection", &qdrant.collection)]
		{
			if value.trim().is_empty() {
				return Err(Error::Validation { message: format!("{label} must be non-empty.") });
			}
		}
	}

	let embedding = &cfg.providers.embedding;

	if !embedding.is_local() {
		for (label, value) in [
			("providers.embedding.api_base", &embedding.api_base),
			("providers.embedding.api_key", &embedding.api_key),
			("providers.embedding.model", &embedding.model),
		] {
			if value.trim().is_empty() {
				return Err(Error::Validation { message: format!("{label} must be non-empty.") });
			}
		}
	}

	let completion = &cfg.providers.completion;

	for (label, value) in [
		("providers.completion.api_base", &completion.api_base),
		("providers.completion.api_key", &completion.api_key),
		("providers.completion.model", &completion.model),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	if !completion.temperature.is_finite() || completion.temperature < 0.0 {
		return Err(Error::Validation {
			message: "providers.completion.temperature must be a finite number, zero or greater."
				.to_string(),
		});
	}
	if embedding.timeout_ms == 0 || completion.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "Provider timeout_ms must be greater than zero.".to_string(),
		});
	}
	if cfg.chunking.window_tokens == 0 {
		return Err(Error::Validation {
			message: "chunking.window_tokens must be greater than zero.".to_string(),
		});
	}
	if !cfg.chunking.overlap_fraction.is_finite()
		|| !(0.0..1.0).contains(&cfg.chunking.overlap_fraction)
	{
		return Err(Error::Validation {
			message: "chunking.overlap_fraction must be in the range [0.0, 1.0).".to_string(),
		});
	}

	let retrieval = &cfg.retrieval;

	if retrieval.top_k == 0 {
		return Err(Error::Validation {
			message: "retrieval.top_k must be greater than zero.".to_string(),
		});
	}
	if retrieval.max_top_k < retrieval.top_k {
		return Err(Error::Validation {
			message: "retrieval.max_top_k must be greater than or equal to retrieval.top_k."
				.to_string(),
		});
	}
	if retrieval.overfetch_factor == 0 {
		return Err(Error::Validation {
			message: "retrieval.overfetch_factor must be greater than zero.".to_string(),
		});
	}

	for (label, weight) in
		[("retrieval.weight_a", retrieval.weight_a), ("retrieval.weight_b", retrieval.weight_b)]
	{
		if !weight.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if weight < 0.0 {
			return Err(Error::Validation { message: format!("{label} must be zero or greater.") });
		}
	}

	if retrieval.weight_a + retrieval.weight_b <= 0.0 {
		return Err(Error::Validation {
			message: "retrieval.weight_a and retrieval.weight_b must not both be zero.".to_string(),
		});
	}
	if retrieval.timeout_ms == 0 {
		return Err(Error::Validation {
			message: "retrieval.timeout_ms must be greater than zero.".to_string(),
		});
	}

	if let Some(cutoff) = retrieval.min_fused_score
		&& !cutoff.is_finite()
	{
		return Err(Error::Validation {
			message: "retrieval.min_fused_score must be a finite number.".to_string(),
		});
	}

	if cfg.memory.window_turns == 0 {
		return Err(Error::Validation {
			message: "memory.window_turns must be greater than zero.".to_string(),
		});
	}
	if cfg.memory.prompt_turns > cfg.memory.window_turns {
		return Err(Error::Validation {
			message: "memory.prompt_turns must be less than or equal to memory.window_turns."
				.to_string(),
		});
	}
	if cfg.memory.window_minutes == Some(0) {
		return Err(Error::Validation {
			message: "memory.window_minutes must be greater than zero when set.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.providers.embedding.provider_id = cfg.providers.embedding.provider_id.trim().to_string();

	if cfg.storage.index_a.snapshot_path.as_deref().is_some_and(|path| path.as_os_str().is_empty())
	{
		cfg.storage.index_a.snapshot_path = None;
	}
	if cfg.storage.index_b.snapshot_path.as_deref().is_some_and(|path| path.as_os_str().is_empty())
	{
		cfg.storage.index_b.snapshot_path = None;
	}
	if let Some(corpus) = cfg.corpus.as_mut() {
		for dir in [&mut corpus.sox_dir, &mut corpus.public_sec_dir, &mut corpus.private_sec_dir] {
			if dir.as_deref().is_some_and(|path| path.as_os_str().is_empty()) {
				*dir = None;
			}
		}
	}
}
