use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};

use reqwest::blocking::Client;
use tracing::*;

use crate::{
    consts::{DATASET_FILE, DEFAULT_MODEL_SOURCES, DOWNLOAD_TIMEOUT_SECS, HF_BASE_URL},
    error::SpectraiError,
    project::config::ModelEntry,
};

/// A model file published on the Hugging Face hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub repo_id: String,
    pub filename: String,
    pub revision: String,
}

impl ModelSource {
    pub fn new<S: Into<String>, T: Into<String>>(repo_id: S, filename: T) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: "main".to_string(),
        }
    }

    pub fn url(&self) -> String {
        self.file_url(&self.filename)
    }

    /// URL of another file in the same repository.
    pub fn file_url(&self, filename: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            HF_BASE_URL, self.repo_id, self.revision, filename
        )
    }

    /// Last segment of the repository id, used as the local folder name.
    pub fn repo_name(&self) -> &str {
        self.repo_id.rsplit('/').next().unwrap_or(&self.repo_id)
    }

    pub fn defaults() -> Vec<Self> {
        DEFAULT_MODEL_SOURCES
            .iter()
            .map(|(repo_id, filename)| Self::new(*repo_id, *filename))
            .collect()
    }
}

/// Where a model and its label file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedModel {
    pub name: String,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

impl From<&DownloadedModel> for ModelEntry {
    fn from(model: &DownloadedModel) -> Self {
        ModelEntry {
            name: model.name.clone(),
            path: model.model_path.clone(),
            labels: Some(model.labels_path.clone()),
        }
    }
}

pub struct ModelDownloader {
    sources: Vec<ModelSource>,
    timeout: Duration,
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new(ModelSource::defaults())
    }
}

impl ModelDownloader {
    pub fn new(sources: Vec<ModelSource>) -> Self {
        Self {
            sources,
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sources(&self) -> &[ModelSource] {
        &self.sources
    }

    /// Fetches every model and its `dataset.yaml` into `dest/models/<repo-name>/`.
    ///
    /// Files already on disk are kept as they are.
    pub fn download_all<P: AsRef<Path>>(
        &self,
        dest: P,
    ) -> Result<Vec<DownloadedModel>, SpectraiError> {
        let models_dir = dest.as_ref().join("models");
        let mut client = None;
        let mut downloaded = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let model_dir = models_dir.join(source.repo_name());
            fs::create_dir_all(&model_dir).map_err(|err| SpectraiError::DownloadFailed {
                url: source.url(),
                message: format!("cannot create {}: {}", model_dir.display(), err),
            })?;

            let model_path = model_dir.join(&source.filename);
            let labels_path = model_dir.join(DATASET_FILE);

            for (url, path) in [
                (source.url(), &model_path),
                (source.file_url(DATASET_FILE), &labels_path),
            ] {
                if path.exists() {
                    info!("{} already exists, skipping download", path.display());
                    continue;
                }
                if client.is_none() {
                    client = Some(self.client()?);
                }
                if let Some(client) = &client {
                    fetch(client, &url, path)?;
                }
            }

            downloaded.push(DownloadedModel {
                name: source.filename.clone(),
                model_path,
                labels_path,
            });
        }

        Ok(downloaded)
    }

    fn client(&self) -> Result<Client, SpectraiError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| SpectraiError::DownloadFailed {
                url: HF_BASE_URL.to_string(),
                message: err.to_string(),
            })
    }
}

/// Streams `url` into `path` through a `.part` file so an interrupted download is
/// never mistaken for a finished one.
fn fetch(client: &Client, url: &str, path: &Path) -> Result<(), SpectraiError> {
    let failed = |message: String| SpectraiError::DownloadFailed {
        url: url.to_string(),
        message,
    };

    info!("Downloading {} to {}", url, path.display());
    let mut response = client
        .get(url)
        .send()
        .and_then(|response| response.error_for_status())
        .map_err(|err| failed(err.to_string()))?;

    let partial = path.with_extension("part");
    let mut file = File::create(&partial)
        .map_err(|err| failed(format!("cannot create {}: {}", partial.display(), err)))?;
    let bytes = response.copy_to(&mut file).map_err(|err| {
        fs::remove_file(&partial).ok();
        failed(err.to_string())
    })?;
    fs::rename(&partial, path)
        .map_err(|err| failed(format!("cannot move into {}: {}", path.display(), err)))?;

    info!("Downloaded {} bytes to {}", bytes, path.display());
    Ok(())
}
