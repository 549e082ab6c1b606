use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::*;

use crate::{
    analysis::labels::LabelSet,
    consts::{DATASET_FILE, MIN_BOX_SIZE, PROBA_THRESHOLD, PROJECT_FILE},
    error::{IoReadSnafu, IoWriteSnafu, JsonSnafu, SpectraiError},
    view::image_manager::FitMode,
};

/// A detector registered with the project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    /// Label file of the model, `dataset.yaml` next to it when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<PathBuf>,
}

impl ModelEntry {
    pub fn labels_path(&self) -> PathBuf {
        match &self.labels {
            Some(labels) => labels.clone(),
            None => self
                .path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(DATASET_FILE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default)]
    pub fit_mode: FitMode,
    #[serde(default = "default_min_box_size")]
    pub min_box_size: f32,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: f32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            fit_mode: FitMode::default(),
            min_box_size: default_min_box_size(),
            min_confidence: default_min_confidence(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

fn default_min_box_size() -> f32 {
    MIN_BOX_SIZE
}

fn default_min_confidence() -> f32 {
    PROBA_THRESHOLD
}

fn default_viewport_width() -> f32 {
    1280.0
}

fn default_viewport_height() -> f32 {
    720.0
}

/// Contents of a project's `config.json`.
///
/// The upper-case keys are shared with projects made by the desktop tool, which stores
/// absolute paths. Relative paths are resolved against the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(rename = "IMAGES_PATH")]
    pub images_path: PathBuf,
    #[serde(rename = "ANNOTATIONS_PATH")]
    pub annotations_path: PathBuf,
    #[serde(rename = "ROOT", default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(rename = "MODEL_PATHS", default)]
    pub model_paths: Vec<ModelEntry>,
    #[serde(default)]
    pub settings: SessionSettings,
}

impl ProjectConfig {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(images_path: P, annotations_path: Q) -> Self {
        Self {
            images_path: images_path.into(),
            annotations_path: annotations_path.into(),
            root: None,
            model_paths: Vec::new(),
            settings: SessionSettings::default(),
        }
    }

    /// Reads `config.json` from a project root.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self, SpectraiError> {
        let path = root.as_ref().join(PROJECT_FILE);
        let path_str = path.to_string_lossy().to_string();
        let content = fs::read_to_string(&path).context(IoReadSnafu { path: &path_str })?;
        let config = serde_json::from_str(&content).context(JsonSnafu { path: &path_str })?;
        debug!("Loaded project config {}", path.display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, root: P) -> Result<(), SpectraiError> {
        let path = root.as_ref().join(PROJECT_FILE);
        let path_str = path.to_string_lossy().to_string();
        let content = serde_json::to_string_pretty(self).context(JsonSnafu { path: &path_str })?;
        fs::write(&path, content).context(IoWriteSnafu { path: &path_str })?;
        debug!("Saved project config {}", path.display());
        Ok(())
    }

    /// Sets up a project in `root`.
    ///
    /// Writes `config.json`, creates the annotations folder and writes the default
    /// label set unless the project already has a `dataset.yaml`.
    pub fn create<P: AsRef<Path>, Q: Into<PathBuf>, R: Into<PathBuf>>(
        root: P,
        images_path: Q,
        annotations_path: R,
    ) -> Result<Self, SpectraiError> {
        let root = root.as_ref();
        let config = Self::new(images_path, annotations_path);

        let annotations_dir = config.annotations_dir(root);
        fs::create_dir_all(&annotations_dir).context(IoWriteSnafu {
            path: annotations_dir.to_string_lossy(),
        })?;
        config.save(root)?;

        let dataset = config.dataset_path(root);
        if !dataset.exists() {
            LabelSet::default_labels().save(&dataset)?;
        }

        info!("Created project at {}", root.display());
        Ok(config)
    }

    pub fn images_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.images_path)
    }

    pub fn annotations_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.annotations_path)
    }

    pub fn dataset_path(&self, root: &Path) -> PathBuf {
        root.join(DATASET_FILE)
    }

    /// Registers a model, replacing any entry with the same name.
    pub fn register_model(&mut self, entry: ModelEntry) {
        self.model_paths.retain(|existing| existing.name != entry.name);
        self.model_paths.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_desktop_tool_config() {
        let content = r#"{
            "IMAGES_PATH": "/data/spectra/images/train",
            "ANNOTATIONS_PATH": "/data/spectra/labels/train",
            "ROOT": "/data/spectra",
            "MODEL_PATHS": [{"name": "spectrai_12FG.onnx", "path": "/data/spectra/models/12FG/spectrai_12FG.onnx"}]
        }"#;
        let config: ProjectConfig = serde_json::from_str(content).unwrap();

        // Absolute paths survive joining
        let root = Path::new("/elsewhere");
        assert_eq!(
            config.images_dir(root),
            PathBuf::from("/data/spectra/images/train")
        );
        assert_eq!(config.settings, SessionSettings::default());
        assert_eq!(
            config.model_paths[0].labels_path(),
            PathBuf::from("/data/spectra/models/12FG/dataset.yaml")
        );
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let content = r#"{
            "IMAGES_PATH": "images",
            "ANNOTATIONS_PATH": "labels",
            "settings": {"fit_mode": "stretch", "min_confidence": 0.6}
        }"#;
        let config: ProjectConfig = serde_json::from_str(content).unwrap();
        assert_eq!(config.settings.fit_mode, FitMode::Stretch);
        assert_eq!(config.settings.min_confidence, 0.6);
        assert_eq!(config.settings.min_box_size, MIN_BOX_SIZE);
        assert!(config.model_paths.is_empty());
        assert_eq!(
            config.annotations_dir(Path::new("/p")),
            PathBuf::from("/p/labels")
        );
    }

    #[test]
    fn test_create_and_load() {
        let root = std::env::temp_dir().join(format!("spectrai-config-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&root).unwrap();

        let mut config = ProjectConfig::create(&root, "images", "labels").unwrap();
        assert!(root.join("labels").is_dir());
        let labels = LabelSet::load(root.join(DATASET_FILE)).unwrap();
        assert_eq!(labels, LabelSet::default_labels());

        config.register_model(ModelEntry {
            name: "ir".to_string(),
            path: PathBuf::from("models/ir.onnx"),
            labels: None,
        });
        config.register_model(ModelEntry {
            name: "ir".to_string(),
            path: PathBuf::from("models/ir2.onnx"),
            labels: None,
        });
        config.save(&root).unwrap();

        let loaded = ProjectConfig::load(&root).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.model_paths.len(), 1);

        // An existing label file is left alone
        LabelSet::from_names(["custom"]).unwrap().save(root.join(DATASET_FILE)).unwrap();
        ProjectConfig::create(&root, "images", "labels").unwrap();
        let labels = LabelSet::load(root.join(DATASET_FILE)).unwrap();
        assert_eq!(labels.names(), ["custom"]);

        fs::remove_dir_all(&root).ok();
    }
}
