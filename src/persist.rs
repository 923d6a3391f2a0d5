use std::io::{Error, ErrorKind, Result};
use std::path::PathBuf;

use async_std::stream::StreamExt;
use serde::{Deserialize, Serialize};

use crate::animation::AnimationRequest;

/// On-disk record for one saved continuous animation.
#[derive(Debug, Serialize, Deserialize)]
struct SavedAnimation {
  saved_at: chrono::DateTime<chrono::Utc>,
  request: AnimationRequest,
}

/// The persisted-animation hook: continuous requests are written to a
/// directory keyed by identifier so the server can restore them at startup.
#[derive(Debug, Clone)]
pub struct Store {
  dir: PathBuf,
}

impl Store {
  pub fn new(dir: PathBuf) -> Self {
    Store { dir }
  }

  pub async fn prepare(&self) -> Result<()> {
    async_std::fs::create_dir_all(&self.dir).await
  }

  fn path_for(&self, id: &str) -> Result<PathBuf> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
      return Err(Error::new(
        ErrorKind::InvalidInput,
        format!("identifier '{}' is not storable", id),
      ));
    }

    Ok(self.dir.join(format!("{}.json", id)))
  }

  pub async fn save(&self, id: &str, request: &AnimationRequest) -> Result<()> {
    let record = SavedAnimation {
      saved_at: chrono::Utc::now(),
      request: request.clone(),
    };

    let encoded = serde_json::to_vec_pretty(&record).map_err(|error| Error::new(ErrorKind::InvalidData, error))?;
    async_std::fs::write(self.path_for(id)?, encoded).await?;
    log::debug!("persisted animation '{}'", id);
    Ok(())
  }

  pub async fn remove(&self, id: &str) -> Result<()> {
    match async_std::fs::remove_file(self.path_for(id)?).await {
      Ok(()) => Ok(()),
      Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
      Err(error) => Err(error),
    }
  }

  /// Loads every parseable record in the store, skipping (and logging) any
  /// file that no longer decodes.
  pub async fn load(&self) -> Result<Vec<AnimationRequest>> {
    let mut requests = vec![];
    let mut entries = async_std::fs::read_dir(&self.dir).await?;

    while let Some(entry) = entries.next().await {
      let path = entry?.path();

      if path.extension().map(|extension| extension == "json") != Some(true) {
        continue;
      }

      let bytes = async_std::fs::read(&path).await?;

      match serde_json::from_slice::<SavedAnimation>(&bytes) {
        Ok(record) => requests.push(record.request),
        Err(error) => log::warn!("skipping unreadable animation record '{:?}' - {}", path, error),
      }
    }

    Ok(requests)
  }
}
