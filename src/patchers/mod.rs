mod annotation_patcher;
mod pod_patcher;
mod structural_state;
#[cfg(test)]
mod test;

pub use annotation_patcher::{annotation_path, annotation_patches, cni_annotation_patches, cni_annotations};
pub use pod_patcher::{sidecar_container_index, PodPatcher};
pub use structural_state::{Collection, StructuralState};
use thiserror::Error;

use crate::{
    common::Meta,
    renderers::{RenderError, TeraRenderer},
};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("rendering failed {0}")]
    Render(#[from] RenderError),
    #[error("rendered fragment is not valid JSON {0}")]
    Fragment(#[source] serde_json::Error),
    #[error("renderer produced no sidecar containers")]
    MissingSidecar,
    #[error("init containers are appended while sidecar containers are created, sidecar index is ambiguous")]
    InconsistentContainerPlacement,
    #[error("collection {0} is referenced before it exists")]
    MissingCollection(Collection),
    #[error("sidecar container index is referenced before it is fixed")]
    SidecarIndexUnset,
    #[error("sidecar container index already fixed at {fixed}, requested {requested}")]
    SidecarIndexConflict { fixed: usize, requested: usize },
    #[error("patch serialization failed {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Compiles `meta` with the bundled templates and returns the serialized JSON patch.
pub fn generate_patch(meta: &Meta) -> Result<Vec<u8>, PatchError> {
    PodPatcher::new(TeraRenderer).generate(meta)
}
