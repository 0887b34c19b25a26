use std::collections::BTreeMap;

use json_patch::{jsonptr::PointerBuf, AddOperation, PatchOperation, ReplaceOperation};
use serde_json::{Map, Value};

use crate::common::{
    Meta, APPMESH_EGRESS_IGNORED_IPS_ANNOTATION, APPMESH_EGRESS_IGNORED_PORTS_ANNOTATION, APPMESH_IGNORED_UID_ANNOTATION,
    APPMESH_PORTS_ANNOTATION, APPMESH_PROXY_EGRESS_PORT, APPMESH_PROXY_EGRESS_PORT_ANNOTATION, APPMESH_PROXY_INGRESS_PORT,
    APPMESH_PROXY_INGRESS_PORT_ANNOTATION, APPMESH_PROXY_UID, APPMESH_SIDECAR_INJECT_ANNOTATION,
};

#[derive(Clone, Copy)]
enum AnnotationMap<'a> {
    Absent,
    /// Created by this patch; only holds the key it was created with.
    Created,
    Existing(&'a BTreeMap<String, String>),
}

/// `/metadata/annotations/<key>` with `~` and `/` in the key escaped as `~0` and `~1`.
pub fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}

/// One operation per desired annotation, in key order.
///
/// Without an annotation map the first key creates it and the remaining keys are added one by one. Keys already
/// carrying a non-empty value are replaced.
pub fn annotation_patches(existing: Option<&BTreeMap<String, String>>, desired: &BTreeMap<String, String>) -> Vec<PatchOperation> {
    let mut annotations = existing.map_or(AnnotationMap::Absent, AnnotationMap::Existing);
    let mut patches = Vec::with_capacity(desired.len());
    for (key, value) in desired {
        let operation = match annotations {
            AnnotationMap::Absent => {
                annotations = AnnotationMap::Created;
                PatchOperation::Add(AddOperation {
                    path: PointerBuf::from_tokens(["metadata", "annotations"]),
                    value: Value::Object(Map::from_iter([(key.clone(), Value::String(value.clone()))])),
                })
            },
            AnnotationMap::Existing(existing) if existing.get(key).is_some_and(|v| !v.is_empty()) => {
                PatchOperation::Replace(ReplaceOperation {
                    path: annotation_path(key),
                    value: Value::String(value.clone()),
                })
            },
            AnnotationMap::Created | AnnotationMap::Existing(_) => PatchOperation::Add(AddOperation {
                path: annotation_path(key),
                value: Value::String(value.clone()),
            }),
        };
        patches.push(operation);
    }
    patches
}

/// Annotations asking the App Mesh CNI plugin to configure the proxy for this pod.
pub fn cni_annotations(meta: &Meta) -> BTreeMap<String, String> {
    [
        (APPMESH_EGRESS_IGNORED_IPS_ANNOTATION, meta.init.ignored_ips.as_str()),
        (APPMESH_EGRESS_IGNORED_PORTS_ANNOTATION, meta.init.egress_ignored_ports.as_str()),
        (APPMESH_PORTS_ANNOTATION, meta.init.ports.as_str()),
        (APPMESH_SIDECAR_INJECT_ANNOTATION, "enabled"),
        (APPMESH_IGNORED_UID_ANNOTATION, APPMESH_PROXY_UID),
        (APPMESH_PROXY_EGRESS_PORT_ANNOTATION, APPMESH_PROXY_EGRESS_PORT),
        (APPMESH_PROXY_INGRESS_PORT_ANNOTATION, APPMESH_PROXY_INGRESS_PORT),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect()
}

pub fn cni_annotation_patches(meta: &Meta) -> Vec<PatchOperation> {
    annotation_patches(meta.pod_metadata.annotations.as_ref(), &cni_annotations(meta))
}
