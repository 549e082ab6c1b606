use std::{collections::HashMap, fs, path::Path};

use serde_yaml::{Mapping, Value};
use snafu::{ResultExt, ensure};
use tracing::*;

use crate::{
    consts::DEFAULT_LABELS,
    error::{
        DuplicateLabelSnafu, IoReadSnafu, IoWriteSnafu, LabelFileSnafu, SpectraiError,
        UnknownLabelSnafu, YamlSnafu,
    },
};

/// Ordered, append-only registry of label names.
///
/// A label's index is its position in the registry and never changes once assigned;
/// names are unique, so a name maps to exactly one index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from names in index order. Duplicate names are rejected.
    pub fn from_names<I, S>(names: I) -> Result<Self, SpectraiError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut labels = Self::new();
        for name in names {
            let name = name.into();
            ensure!(
                labels.index_of(&name).is_none(),
                DuplicateLabelSnafu { name }
            );
            labels.get_or_insert(&name);
        }
        Ok(labels)
    }

    /// The infrared functional-group classes new projects start with.
    pub fn default_labels() -> Self {
        let mut labels = Self::new();
        for name in DEFAULT_LABELS {
            labels.get_or_insert(name);
        }
        labels
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, label_id: usize) -> Option<&str> {
        self.names.get(label_id).map(String::as_str)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains_index(&self, label_id: usize) -> bool {
        label_id < self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }

    /// Label name for display, falling back to the bare index for unknown labels.
    pub fn display_name(&self, label_id: usize) -> String {
        self.get(label_id)
            .map(str::to_string)
            .unwrap_or_else(|| label_id.to_string())
    }

    pub fn check_index(&self, label_id: usize) -> Result<(), SpectraiError> {
        ensure!(
            self.contains_index(label_id),
            UnknownLabelSnafu {
                label_id,
                len: self.len()
            }
        );
        Ok(())
    }

    /// Returns the index of `name`, appending it at the end when it is new.
    ///
    /// The flag is `true` when the name was appended.
    pub fn get_or_insert(&mut self, name: &str) -> (usize, bool) {
        if let Some(idx) = self.index_of(name) {
            return (idx, false);
        }

        let idx = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), idx);
        (idx, true)
    }

    /// Reads the `names` entry of a `dataset.yaml` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SpectraiError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context(IoReadSnafu {
            path: path.to_string_lossy(),
        })?;
        let labels = Self::parse_yaml(&content, &path.to_string_lossy())?;
        debug!("Loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Parses dataset yaml content. `names` may be a list or an index-to-name map.
    pub fn parse_yaml(content: &str, path: &str) -> Result<Self, SpectraiError> {
        let doc: Value = serde_yaml::from_str(content).context(YamlSnafu { path })?;

        let names = match doc.get("names") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(seq)) => seq
                .iter()
                .map(|value| label_name(value, path))
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Mapping(map)) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, value) in map {
                    entries.push((label_key(key, path)?, label_name(value, path)?));
                }
                entries.sort_by_key(|(idx, _)| *idx);

                // Indices are positions, so the keys must be exactly 0..n
                for (position, (idx, _)) in entries.iter().enumerate() {
                    ensure!(
                        position == *idx,
                        LabelFileSnafu {
                            path,
                            message: format!("label indices must be contiguous from 0, found {idx}"),
                        }
                    );
                }
                entries.into_iter().map(|(_, name)| name).collect()
            }
            Some(_) => {
                return LabelFileSnafu {
                    path,
                    message: "`names` must be a list or a map",
                }
                .fail();
            }
        };

        Self::from_names(names)
    }

    /// Writes the set as `names`/`nc` into `path`, keeping any other keys already there.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SpectraiError> {
        let path = path.as_ref();
        let path_str = path.to_string_lossy().to_string();

        let mut doc = if path.exists() {
            let content = fs::read_to_string(path).context(IoReadSnafu { path: &path_str })?;
            match serde_yaml::from_str::<Value>(&content).context(YamlSnafu { path: &path_str })? {
                Value::Mapping(map) => map,
                _ => Mapping::new(),
            }
        } else {
            Mapping::new()
        };

        let mut names = Mapping::new();
        for (idx, name) in self.iter() {
            names.insert(Value::from(idx as u64), Value::from(name));
        }
        doc.insert(Value::from("nc"), Value::from(self.len() as u64));
        doc.insert(Value::from("names"), Value::Mapping(names));

        let yaml = serde_yaml::to_string(&doc).context(YamlSnafu { path: &path_str })?;
        fs::write(path, yaml).context(IoWriteSnafu { path: &path_str })?;
        info!("Saved {} labels to {}", self.len(), path.display());
        Ok(())
    }
}

fn label_name(value: &Value, path: &str) -> Result<String, SpectraiError> {
    match value {
        Value::String(name) => Ok(name.clone()),
        Value::Number(number) => Ok(number.to_string()),
        _ => LabelFileSnafu {
            path,
            message: format!("label names must be strings, found {value:?}"),
        }
        .fail(),
    }
}

fn label_key(key: &Value, path: &str) -> Result<usize, SpectraiError> {
    let idx = match key {
        Value::Number(number) => number.as_u64().map(|idx| idx as usize),
        Value::String(text) => text.trim().parse::<usize>().ok(),
        _ => None,
    };
    idx.ok_or_else(|| SpectraiError::LabelFile {
        path: path.to_string(),
        message: format!("label keys must be non-negative integers, found {key:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_insert_is_append_only() {
        let mut labels = LabelSet::from_names(["alkene", "ketones"]).unwrap();
        assert_eq!(labels.get_or_insert("ketones"), (1, false));
        assert_eq!(labels.get_or_insert("phenol"), (2, true));
        assert_eq!(labels.get_or_insert("phenol"), (2, false));
        assert_eq!(labels.names(), ["alkene", "ketones", "phenol"]);
        assert_eq!(labels.index_of("alkene"), Some(0));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = LabelSet::from_names(["amines", "amines"]).unwrap_err();
        assert!(matches!(err, SpectraiError::DuplicateLabel { .. }));
    }

    #[test]
    fn test_default_labels() {
        let labels = LabelSet::default_labels();
        assert_eq!(labels.len(), 12);
        assert_eq!(labels.get(0), Some("aromatics"));
        assert_eq!(labels.get(11), Some("alkyne"));
        assert_eq!(labels.display_name(42), "42");
    }

    #[test]
    fn test_check_index() {
        let labels = LabelSet::from_names(["a", "b"]).unwrap();
        assert!(labels.check_index(1).is_ok());
        assert!(matches!(
            labels.check_index(2),
            Err(SpectraiError::UnknownLabel { label_id: 2, len: 2 })
        ));
    }

    #[test]
    fn test_parse_names_list() {
        let labels = LabelSet::parse_yaml("names:\n  - esters\n  - amides\n", "inline").unwrap();
        assert_eq!(labels.names(), ["esters", "amides"]);
    }

    #[test]
    fn test_parse_names_map_sorted_by_index() {
        let content = "path: ../data\nnames:\n  2: nitriles\n  0: alcohols\n  '1': amines\n";
        let labels = LabelSet::parse_yaml(content, "inline").unwrap();
        assert_eq!(labels.names(), ["alcohols", "amines", "nitriles"]);
    }

    #[test]
    fn test_parse_names_map_with_gap_rejected() {
        let content = "names:\n  0: alcohols\n  2: nitriles\n";
        let err = LabelSet::parse_yaml(content, "inline").unwrap_err();
        assert!(matches!(err, SpectraiError::LabelFile { .. }));
    }

    #[test]
    fn test_parse_without_names_is_empty() {
        let labels = LabelSet::parse_yaml("train: images/train\n", "inline").unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn test_save_keeps_other_keys() {
        let dir = std::env::temp_dir().join(format!("spectrai-labels-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dataset.yaml");
        fs::write(&path, "train: images/train\nnames:\n  - old\n").unwrap();

        let labels = LabelSet::from_names(["aromatics", "esters"]).unwrap();
        labels.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("train: images/train"));
        assert_eq!(LabelSet::load(&path).unwrap(), labels);

        let doc: Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(doc.get("nc").and_then(Value::as_u64), Some(2));

        fs::remove_dir_all(&dir).ok();
    }
}
