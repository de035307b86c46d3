//! Bulk ingest of the configured category directories.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;

use crate::{Error, FaraService, Result};
use fara_domain::SourceCategory;

const CORPUS_EXTENSION: &str = "txt";

#[derive(Clone, Debug, Default, Serialize)]
pub struct CorpusReport {
	pub documents: Vec<CorpusDocument>,
	pub skipped: Vec<SkippedFile>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CorpusDocument {
	pub document_id: String,
	pub chunks: usize,
	pub partial: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct SkippedFile {
	pub path: PathBuf,
	pub reason: String,
}

impl FaraService {
	/// Ingests every `*.txt` file under the configured directories as
	/// `"<category>/<file name>"`.
	///
	/// Files that cannot be read or chunked are reported and skipped. Embedding failures and both
	/// indexes being down abort the walk.
	pub async fn ingest_corpus(&self) -> Result<CorpusReport> {
		let Some(corpus) = &self.cfg.corpus else {
			return Err(Error::InvalidRequest {
				message: "No corpus directories are configured.".to_string(),
			});
		};
		let dirs = [
			(SourceCategory::Sox, &corpus.sox_dir),
			(SourceCategory::PublicSec, &corpus.public_sec_dir),
			(SourceCategory::PrivateSec, &corpus.private_sec_dir),
		];
		let mut report = CorpusReport::default();

		for (category, dir) in dirs {
			let Some(dir) = dir else {
				continue;
			};

			self.ingest_directory(category, dir, &mut report).await?;
		}

		tracing::info!(
			documents = report.documents.len(),
			skipped = report.skipped.len(),
			"Corpus ingested."
		);

		Ok(report)
	}

	async fn ingest_directory(
		&self,
		category: SourceCategory,
		dir: &Path,
		report: &mut CorpusReport,
	) -> Result<()> {
		let files = match list_text_files(dir).await {
			Ok(files) => files,
			Err(err) => {
				tracing::warn!(path = %dir.display(), error = %err, "Corpus directory unreadable.");
				report
					.skipped
					.push(SkippedFile { path: dir.to_path_buf(), reason: err.to_string() });

				return Ok(());
			},
		};

		for path in files {
			let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
				report.skipped.push(SkippedFile {
					path: path.clone(),
					reason: "file name is not valid UTF-8".to_string(),
				});

				continue;
			};
			let document_id = format!("{category}/{file_name}");
			let raw = match fs::read(&path).await {
				Ok(raw) => raw,
				Err(err) => {
					report.skipped.push(SkippedFile { path, reason: err.to_string() });

					continue;
				},
			};
			let chunks = match self.chunker.split_bytes(&document_id, category, &raw) {
				Ok(chunks) => chunks,
				Err(err) => {
					tracing::warn!(
						document_id = %document_id,
						error = %err,
						"Corpus file skipped."
					);
					report.skipped.push(SkippedFile { path, reason: err.to_string() });

					continue;
				},
			};
			let ingested = self.ingest_chunks(chunks).await?;

			report.documents.push(CorpusDocument {
				document_id: ingested.document_id.clone(),
				chunks: ingested.chunk_ids.len(),
				partial: ingested.is_partial(),
			});
		}

		Ok(())
	}
}

async fn list_text_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
	let mut entries = fs::read_dir(dir).await?;
	let mut files = Vec::new();

	while let Some(entry) = entries.next_entry().await? {
		let path = entry.path();

		if entry.file_type().await?.is_file()
			&& path.extension().is_some_and(|ext| ext == CORPUS_EXTENSION)
		{
			files.push(path);
		}
	}

	files.sort();

	Ok(files)
}
