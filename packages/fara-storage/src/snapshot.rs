use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::Result;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
	version: u32,
	entries: Vec<T>,
}

pub(crate) fn encode<'a, T, I>(entries: I) -> Result<String>
where
	T: Serialize + 'a,
	I: IntoIterator<Item = &'a T>,
{
	let snapshot = Snapshot { version: SNAPSHOT_VERSION, entries: entries.into_iter().collect() };

	Ok(serde_json::to_string(&snapshot)?)
}

/// Missing files load as an empty snapshot.
pub(crate) async fn load<T>(path: &Path) -> Result<Vec<T>>
where
	T: DeserializeOwned,
{
	let raw = match tokio::fs::read(path).await {
		Ok(raw) => raw,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(err) => return Err(err.into()),
	};
	let snapshot: Snapshot<T> = serde_json::from_slice(&raw)?;

	if snapshot.version != SNAPSHOT_VERSION {
		return Err(crate::Error::InvalidArgument(format!(
			"Snapshot {path:?} has version {}, expected {SNAPSHOT_VERSION}.",
			snapshot.version
		)));
	}

	Ok(snapshot.entries)
}

/// Replaces the file through a sibling temp file so readers never see a partial snapshot.
pub(crate) async fn write(path: &Path, payload: String) -> Result<()> {
	if let Some(parent) = path.parent()
		&& !parent.as_os_str().is_empty()
	{
		tokio::fs::create_dir_all(parent).await?;
	}

	let mut tmp = path.as_os_str().to_owned();

	tmp.push(".tmp");

	tokio::fs::write(&tmp, payload).await?;
	tokio::fs::rename(&tmp, path).await?;

	Ok(())
}
