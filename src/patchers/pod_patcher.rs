use json_patch::{jsonptr::PointerBuf, AddOperation, Patch, PatchOperation};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    annotation_patcher::cni_annotation_patches,
    structural_state::{Collection, StructuralState},
    PatchError,
};
use crate::{
    common::{Meta, DEFAULT_FS_GROUP, ECR_SECRET_NAME},
    renderers::{FragmentRenderer, TeraRenderer},
};

/// Compiles a [`Meta`] into the JSON patch injecting the App Mesh proxy into a pod.
///
/// Compilation is a single pass over the pod shape. Every step reads the [`StructuralState`] left by the previous
/// ones, so the order of the steps below is part of the contract:
///
/// 1. proxy init container, or CNI annotations when the CNI plugin injects the proxy
/// 2. `fsGroup`
/// 3. sidecar containers
/// 4. ECR image pull secret
/// 5. tracing config volumes and init containers, Datadog before Jaeger
/// 6. secret volumes and their mounts in the sidecar
#[derive(Clone, Debug, Default)]
pub struct PodPatcher<R = TeraRenderer> {
    renderer: R,
}

impl<R: FragmentRenderer> PodPatcher<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }

    pub fn compile(&self, meta: &Meta) -> Result<Patch, PatchError> {
        let mut state = StructuralState::from(meta);
        let mut patches = vec![];

        if meta.is_cni_enabled() {
            debug!("CNI enabled for pod {}, patching annotations only", meta.pod_name());
            patches.extend(cni_annotation_patches(meta));
        } else {
            if meta.append_init && !meta.append_sidecar {
                warn!("Rejecting pod {}: init containers appended while sidecar containers are created", meta.pod_name());
                return Err(PatchError::InconsistentContainerPlacement);
            }
            let init = parse_fragment(&self.renderer.render_init(&meta.init)?)?;
            patches.extend(state.insert(Collection::InitContainers, vec![init])?);
        }

        if meta.inject_fs_group {
            patches.push(fs_group_patch(DEFAULT_FS_GROUP));
        }

        let sidecars = self.renderer.render_sidecars(&meta.sidecar)?.iter().map(|sidecar| parse_fragment(sidecar)).collect::<Result<Vec<_>, _>>()?;
        if sidecars.is_empty() {
            return Err(PatchError::MissingSidecar);
        }
        debug!("Injecting {} sidecar container(s), append {}", sidecars.len(), meta.append_sidecar);
        patches.extend(state.insert(Collection::Containers, sidecars)?);
        state.fix_sidecar_index(sidecar_container_index(meta))?;
        if meta.sidecar.has_tracing() {
            // The sidecar was rendered with mounts for the tracing config volumes.
            state.mark_created(Collection::SidecarVolumeMounts);
        }

        if meta.has_image_pull_secret {
            patches.extend(state.insert(Collection::ImagePullSecrets, vec![json!({ "name": ECR_SECRET_NAME })])?);
        }

        for backend in meta.sidecar.tracing_backends() {
            debug!("Adding {backend} tracing config");
            let volume = parse_fragment(&self.renderer.render_tracing_volume(backend)?)?;
            patches.extend(state.insert(Collection::Volumes, vec![volume])?);

            let (address, port) = meta.sidecar.tracing_endpoint(backend);
            let init = parse_fragment(&self.renderer.render_tracing_init(backend, address, port)?)?;
            patches.extend(state.insert(Collection::InitContainers, vec![init])?);
        }

        for secret_mount in &meta.sidecar.secret_mounts {
            debug!("Mounting secret {} at {}", secret_mount.secret_name, secret_mount.mount_path);
            let volume_mount = parse_fragment(&self.renderer.render_secret_volume_mount(secret_mount)?)?;
            patches.extend(state.insert(Collection::SidecarVolumeMounts, vec![volume_mount])?);

            let volume = parse_fragment(&self.renderer.render_secret_volume(secret_mount)?)?;
            patches.extend(state.insert(Collection::Volumes, vec![volume])?);
        }

        info!("Generated {} patch operations for pod {}", patches.len(), meta.pod_name());
        Ok(Patch(patches))
    }

    /// Serialized JSON array of the patch operations.
    pub fn generate(&self, meta: &Meta) -> Result<Vec<u8>, PatchError> {
        let patch = self.compile(meta)?;
        serde_json::to_vec(&patch).map_err(PatchError::Serialization)
    }
}

/// The sidecar follows the application container when appended and leads the created containers otherwise.
pub fn sidecar_container_index(meta: &Meta) -> usize {
    usize::from(meta.append_sidecar)
}

fn fs_group_patch(fs_group: i64) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["spec", "securityContext", "fsGroup"]),
        value: Value::from(fs_group),
    })
}

fn parse_fragment(fragment: &str) -> Result<Value, PatchError> {
    serde_json::from_str(fragment).map_err(PatchError::Fragment)
}
