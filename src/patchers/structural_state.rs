use std::fmt::Display;

use json_patch::{jsonptr::PointerBuf, AddOperation, PatchOperation};
use serde_json::Value;
use tracing::debug;

use super::PatchError;
use crate::common::Meta;

/// Pod collections the patch adds entries to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    InitContainers,
    Containers,
    Volumes,
    ImagePullSecrets,
    /// `volumeMounts` of the injected sidecar container.
    SidecarVolumeMounts,
}

impl Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Collection::InitContainers => "initContainers",
            Collection::Containers => "containers",
            Collection::Volumes => "volumes",
            Collection::ImagePullSecrets => "imagePullSecrets",
            Collection::SidecarVolumeMounts => "sidecar volumeMounts",
        };
        f.write_str(name)
    }
}

/// Shape of the pod document as seen by the operations emitted so far in one compilation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructuralState {
    init_containers: bool,
    containers: bool,
    volumes: bool,
    image_pull_secrets: bool,
    sidecar_volume_mounts: bool,
    sidecar_index: Option<usize>,
}

impl From<&Meta> for StructuralState {
    fn from(meta: &Meta) -> Self {
        Self {
            init_containers: meta.append_init,
            containers: meta.append_sidecar,
            volumes: meta.has_volumes(),
            image_pull_secrets: meta.append_image_pull_secret,
            sidecar_volume_mounts: false,
            sidecar_index: None,
        }
    }
}

impl StructuralState {
    pub fn exists(&self, collection: Collection) -> bool {
        match collection {
            Collection::InitContainers => self.init_containers,
            Collection::Containers => self.containers,
            Collection::Volumes => self.volumes,
            Collection::ImagePullSecrets => self.image_pull_secrets,
            Collection::SidecarVolumeMounts => self.sidecar_volume_mounts,
        }
    }

    /// Returns `false` when the collection already existed, leaving the state untouched.
    pub fn mark_created(&mut self, collection: Collection) -> bool {
        let flag = match collection {
            Collection::InitContainers => &mut self.init_containers,
            Collection::Containers => &mut self.containers,
            Collection::Volumes => &mut self.volumes,
            Collection::ImagePullSecrets => &mut self.image_pull_secrets,
            Collection::SidecarVolumeMounts => &mut self.sidecar_volume_mounts,
        };
        if *flag {
            debug!("Collection {collection} already exists");
            false
        } else {
            *flag = true;
            true
        }
    }

    pub fn sidecar_index(&self) -> Option<usize> {
        self.sidecar_index
    }

    pub fn fix_sidecar_index(&mut self, index: usize) -> Result<(), PatchError> {
        match self.sidecar_index {
            Some(fixed) if fixed != index => Err(PatchError::SidecarIndexConflict { fixed, requested: index }),
            _ => {
                self.sidecar_index = Some(index);
                Ok(())
            },
        }
    }

    pub fn path(&self, collection: Collection) -> Result<PointerBuf, PatchError> {
        let path = match collection {
            Collection::InitContainers => PointerBuf::from_tokens(["spec", "initContainers"]),
            Collection::Containers => PointerBuf::from_tokens(["spec", "containers"]),
            Collection::Volumes => PointerBuf::from_tokens(["spec", "volumes"]),
            Collection::ImagePullSecrets => PointerBuf::from_tokens(["spec", "imagePullSecrets"]),
            Collection::SidecarVolumeMounts => {
                if !self.containers {
                    return Err(PatchError::MissingCollection(Collection::Containers));
                }
                let index = self.sidecar_index.ok_or(PatchError::SidecarIndexUnset)?.to_string();
                PointerBuf::from_tokens(["spec", "containers", index.as_str(), "volumeMounts"])
            },
        };
        Ok(path)
    }

    /// Adds `values` to `collection`.
    ///
    /// A missing collection is created with a single whole-array `add` holding every value, after which it is
    /// tracked as existing. An existing collection gets one `add` to `<collection>/-` per value so entries
    /// already in the pod are preserved.
    pub fn insert(&mut self, collection: Collection, values: Vec<Value>) -> Result<Vec<PatchOperation>, PatchError> {
        let path = self.path(collection)?;
        if self.exists(collection) {
            let mut append_path = path;
            append_path.push_back("-");
            Ok(values
                .into_iter()
                .map(|value| PatchOperation::Add(AddOperation { path: append_path.clone(), value }))
                .collect())
        } else {
            debug!("Creating collection {collection} at {path}");
            self.mark_created(collection);
            Ok(vec![PatchOperation::Add(AddOperation { path, value: Value::Array(values) })])
        }
    }
}
