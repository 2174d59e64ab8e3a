//! Merged object model and its sources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bpms_core::ModelsConfig;
use tracing::{debug, info};

use crate::definition::{DefinitionFile, ObjectDefinition};
use crate::error::{ModelError, ModelResult};

const OMA_OBJECTS: &str = include_str!("../models/oma-objects-spec.json");
const BPMS_OBJECTS: &str = include_str!("../models/bpms-objects-spec.json");

/// Object definitions indexed by object id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectModel {
    objects: BTreeMap<u16, ObjectDefinition>,
}

impl ObjectModel {
    /// Builds a model from one source; ids must be unique within it.
    pub fn from_definitions(origin: &str, definitions: Vec<ObjectDefinition>) -> ModelResult<Self> {
        let mut objects = BTreeMap::new();
        for object in definitions {
            object.check().map_err(|reason| ModelError::Invalid {
                id: object.id,
                origin: origin.to_string(),
                reason,
            })?;
            let id = object.id;
            if objects.insert(id, object).is_some() {
                return Err(ModelError::Duplicate {
                    id,
                    origin: origin.to_string(),
                });
            }
        }
        Ok(Self { objects })
    }

    /// Adds `extension` on top of `self`; extension definitions win.
    pub fn merge(mut self, extension: ObjectModel) -> Self {
        for (id, object) in extension.objects {
            if self.objects.insert(id, object).is_some() {
                debug!(object = id, "Extension overrides baseline object definition");
            }
        }
        self
    }

    pub fn get(&self, id: u16) -> Option<&ObjectDefinition> {
        self.objects.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.objects.keys().copied()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn parse(origin: &str, json: &str) -> ModelResult<Vec<ObjectDefinition>> {
    serde_json::from_str::<DefinitionFile>(json)
        .map(DefinitionFile::into_vec)
        .map_err(|source| ModelError::Parse {
            origin: origin.to_string(),
            source,
        })
}

/// Embedded OMA core objects (0 to 7).
pub fn baseline() -> ModelResult<ObjectModel> {
    ObjectModel::from_definitions("builtin:oma", parse("builtin:oma", OMA_OBJECTS)?)
}

/// Embedded BPMS extension objects.
pub fn builtin_extension() -> ModelResult<ObjectModel> {
    ObjectModel::from_definitions("builtin:bpms", parse("builtin:bpms", BPMS_OBJECTS)?)
}

/// Loads every `*.json` file of `dir`, in file name order.
pub fn load_dir(dir: &Path) -> ModelResult<ObjectModel> {
    let entries = std::fs::read_dir(dir).map_err(|source| ModelError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|source| ModelError::Directory {
                path: dir.to_path_buf(),
                source,
            })?
            .path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let mut definitions = Vec::new();
    for file in &files {
        let json = std::fs::read_to_string(file).map_err(|source| ModelError::Read {
            path: file.clone(),
            source,
        })?;
        definitions.extend(parse(&file.display().to_string(), &json)?);
    }

    if definitions.is_empty() {
        return Err(ModelError::Empty(dir.to_path_buf()));
    }

    let model = ObjectModel::from_definitions(&dir.display().to_string(), definitions)?;
    info!(dir = %dir.display(), files = files.len(), objects = model.len(), "Loaded object definitions");
    Ok(model)
}

/// Where the extension definitions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionSource {
    Builtin,
    Directory(PathBuf),
    /// Explicit opt-out: baseline only.
    Skipped,
}

impl ExtensionSource {
    pub fn from_config(config: &ModelsConfig) -> Self {
        match (&config.extension_dir, config.skip_extensions) {
            (_, true) => Self::Skipped,
            (Some(dir), false) => Self::Directory(dir.clone()),
            (None, false) => Self::Builtin,
        }
    }

    /// Loads the extension set. `None` only for the explicit opt-out.
    pub fn load(&self) -> ModelResult<Option<ObjectModel>> {
        match self {
            Self::Builtin => builtin_extension().map(Some),
            Self::Directory(dir) => load_dir(dir).map(Some),
            Self::Skipped => Ok(None),
        }
    }
}

/// Baseline merged with the configured extension set.
pub fn load_merged(config: &ModelsConfig) -> ModelResult<ObjectModel> {
    let source = ExtensionSource::from_config(config);
    let baseline = baseline()?;

    let model = match source.load()? {
        Some(extension) => baseline.merge(extension),
        None => {
            info!("Object model extensions skipped, using baseline definitions only");
            baseline
        }
    };

    info!(objects = model.len(), extensions = ?source, "Object model ready");
    Ok(model)
}
