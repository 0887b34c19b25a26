use std::collections::BTreeMap;

use json_patch::Patch;
use k8s_openapi::api::core::v1::Volume;
use serde_json::{json, Value};

use super::{PatchError, PodPatcher};
use crate::{
    common::{InitMeta, Meta, SecretMount, SidecarMeta, TracingBackend, APPMESH_CNI_ANNOTATION, APPMESH_PORTS_ANNOTATION, FARGATE_PROFILE_LABEL},
    renderers::{FragmentRenderer, RenderError, TeraRenderer},
};

fn compile(meta: &Meta) -> Patch {
    PodPatcher::new(TeraRenderer).compile(meta).unwrap()
}

fn operations(patch: &Patch) -> Vec<(String, String)> {
    let Value::Array(operations) = serde_json::to_value(patch).unwrap() else { panic!("patch is not an array") };
    operations.iter().map(|operation| (operation["op"].as_str().unwrap().to_owned(), operation["path"].as_str().unwrap().to_owned())).collect()
}

fn values(patch: &Patch) -> Vec<Value> {
    let Value::Array(operations) = serde_json::to_value(patch).unwrap() else { panic!("patch is not an array") };
    operations.into_iter().map(|mut operation| operation["value"].take()).collect()
}

fn add(path: &str) -> (String, String) {
    ("add".to_owned(), path.to_owned())
}

fn secret_mounts() -> Vec<SecretMount> {
    vec![
        SecretMount::builder().secret_name("tls-certs").mount_path("/etc/certs").build(),
        SecretMount::builder().secret_name("ca-bundle").mount_path("/etc/ca").build(),
    ]
}

/// The pod as the API server sees it, consistent with the flags of `meta`.
fn pod_document(meta: &Meta) -> Value {
    let mut spec = serde_json::to_value(&meta.pod_spec).unwrap();
    if meta.append_init {
        spec["initContainers"] = json!([{ "name": "migrate" }]);
    }
    if meta.append_sidecar {
        spec["containers"] = json!([{ "name": "app" }]);
    }
    if meta.append_image_pull_secret {
        spec["imagePullSecrets"] = json!([{ "name": "registry" }]);
    }
    if meta.pod_spec.automount_service_account_token == Some(true) && meta.pod_spec.volumes.is_none() {
        spec["volumes"] = json!([{ "name": "kube-api-access" }]);
    }
    spec["securityContext"] = json!({});
    json!({ "metadata": serde_json::to_value(&meta.pod_metadata).unwrap(), "spec": spec })
}

fn apply(meta: &Meta, patch: &Patch) -> Value {
    let mut document = pod_document(meta);
    json_patch::patch(&mut document, &patch.0).unwrap();
    document
}

#[test]
fn test_init_container_is_created_as_array() {
    let meta = Meta::builder().append_sidecar(true).build();
    let patch = compile(&meta);

    assert_eq!(operations(&patch)[0], add("/spec/initContainers"));
    let init_containers = &values(&patch)[0];
    assert!(init_containers.is_array());
    assert_eq!(init_containers[0]["name"], "proxyinit");
}

#[test]
fn test_init_containers_are_appended() {
    let meta = Meta::builder()
        .append_init(true)
        .append_sidecar(true)
        .sidecar(
            SidecarMeta::builder()
                .enable_datadog_tracing(true)
                .datadog_address("datadog-agent")
                .datadog_port("8126")
                .enable_jaeger_tracing(true)
                .jaeger_address("jaeger-collector")
                .jaeger_port("9411")
                .build(),
        )
        .build();
    let patch = compile(&meta);

    let init_operations: Vec<_> = operations(&patch).into_iter().filter(|(_, path)| path.starts_with("/spec/initContainers")).collect();
    assert_eq!(init_operations.len(), 3);
    assert!(init_operations.iter().all(|operation| *operation == add("/spec/initContainers/-")));

    let document = apply(&meta, &patch);
    let names: Vec<_> = document["spec"]["initContainers"].as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap().to_owned()).collect();
    assert_eq!(names, vec!["migrate", "proxyinit", "inject-datadog-config", "inject-jaeger-config"]);
}

#[test]
fn test_cni_mode_patches_annotations_only() {
    let mut meta = Meta::builder().append_sidecar(true).init(InitMeta::builder().ports("8080").build()).build();
    meta.pod_metadata.annotations = Some(BTreeMap::from([(APPMESH_CNI_ANNOTATION.to_owned(), "enabled".to_owned())]));
    let patch = compile(&meta);

    let operations = operations(&patch);
    assert!(operations.iter().all(|(_, path)| !path.starts_with("/spec/initContainers")));
    let annotation_operations: Vec<_> = operations.iter().filter(|(_, path)| path.starts_with("/metadata/annotations/")).collect();
    assert_eq!(annotation_operations.len(), 7);
    assert!(annotation_operations.iter().all(|(op, _)| op == "add"));
    assert_eq!(operations[7], add("/spec/containers/-"));

    let document = apply(&meta, &patch);
    let annotations = document["metadata"]["annotations"].as_object().unwrap();
    assert_eq!(annotations.len(), 8);
    assert_eq!(annotations[APPMESH_PORTS_ANNOTATION], "8080");
}

#[test]
fn test_cni_mode_on_fargate_creates_annotation_map() {
    let mut meta = Meta::builder().append_sidecar(true).build();
    meta.pod_metadata.labels = Some(BTreeMap::from([(FARGATE_PROFILE_LABEL.to_owned(), "fp-default".to_owned())]));
    let patch = compile(&meta);

    let operations = operations(&patch);
    assert_eq!(operations[0], add("/metadata/annotations"));
    assert_eq!(operations.iter().filter(|(_, path)| path.starts_with("/metadata/annotations")).count(), 7);
    assert_eq!(values(&patch)[0].as_object().unwrap().len(), 1);

    let document = apply(&meta, &patch);
    assert_eq!(document["metadata"]["annotations"].as_object().unwrap().len(), 7);
}

#[test]
fn test_cni_mode_replaces_existing_annotation() {
    let mut meta = Meta::builder().append_sidecar(true).init(InitMeta::builder().ports("9090").build()).build();
    meta.pod_metadata.annotations = Some(BTreeMap::from([
        (APPMESH_CNI_ANNOTATION.to_owned(), "enabled".to_owned()),
        (APPMESH_PORTS_ANNOTATION.to_owned(), "8080".to_owned()),
    ]));
    let patch = compile(&meta);

    let operations = operations(&patch);
    let ports_path = "/metadata/annotations/appmesh.k8s.aws~1ports";
    assert_eq!(operations.iter().filter(|(op, _)| op == "replace").collect::<Vec<_>>(), vec![&("replace".to_owned(), ports_path.to_owned())]);

    let document = apply(&meta, &patch);
    assert_eq!(document["metadata"]["annotations"][APPMESH_PORTS_ANNOTATION], "9090");
}

#[test]
fn test_secret_mount_scenario_order() {
    let meta = Meta::builder()
        .append_sidecar(true)
        .inject_fs_group(true)
        .sidecar(SidecarMeta::builder().secret_mounts(secret_mounts()).build())
        .build();
    let patch = compile(&meta);

    assert_eq!(
        operations(&patch),
        vec![
            add("/spec/initContainers"),
            add("/spec/securityContext/fsGroup"),
            add("/spec/containers/-"),
            add("/spec/containers/1/volumeMounts"),
            add("/spec/volumes"),
            add("/spec/containers/1/volumeMounts/-"),
            add("/spec/volumes/-"),
        ]
    );
    let values = values(&patch);
    assert_eq!(values[1], json!(1337));
    assert_eq!(values[3], json!([{ "name": "tls-certs", "mountPath": "/etc/certs", "readOnly": true }]));
    assert_eq!(values[6], json!({ "name": "ca-bundle", "secret": { "secretName": "ca-bundle" } }));

    let document = apply(&meta, &patch);
    assert_eq!(document["spec"]["securityContext"]["fsGroup"], 1337);
    assert_eq!(document["spec"]["containers"][1]["name"], "envoy");
    assert_eq!(document["spec"]["containers"][1]["volumeMounts"].as_array().unwrap().len(), 2);
    assert_eq!(document["spec"]["volumes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_created_sidecar_is_first_container() {
    let meta = Meta::builder().sidecar(SidecarMeta::builder().inject_xray_sidecar(true).secret_mounts(secret_mounts()).build()).build();
    let patch = compile(&meta);

    let operations = operations(&patch);
    assert_eq!(operations[1], add("/spec/containers"));
    assert_eq!(operations[2], add("/spec/containers/0/volumeMounts"));
    assert_eq!(operations[4], add("/spec/containers/0/volumeMounts/-"));

    let containers = &values(&patch)[1];
    assert_eq!(containers.as_array().unwrap().len(), 2);
    assert_eq!(containers[0]["name"], "envoy");
    assert_eq!(containers[1]["name"], "xray-daemon");

    let document = apply(&meta, &patch);
    assert_eq!(document["spec"]["containers"][0]["volumeMounts"].as_array().unwrap().len(), 2);
}

#[test]
fn test_existing_volumes_are_preserved() {
    let mut meta = Meta::builder().append_sidecar(true).sidecar(SidecarMeta::builder().secret_mounts(secret_mounts()).build()).build();
    meta.pod_spec.volumes = Some(vec![Volume { name: "data".to_owned(), ..Default::default() }]);
    let patch = compile(&meta);

    let volume_operations: Vec<_> = operations(&patch).into_iter().filter(|(_, path)| path.starts_with("/spec/volumes")).collect();
    assert_eq!(volume_operations, vec![add("/spec/volumes/-"), add("/spec/volumes/-")]);

    let document = apply(&meta, &patch);
    let names: Vec<_> = document["spec"]["volumes"].as_array().unwrap().iter().map(|v| v["name"].as_str().unwrap().to_owned()).collect();
    assert_eq!(names, vec!["data", "tls-certs", "ca-bundle"]);
}

#[test]
fn test_automount_token_volume_is_preserved() {
    let mut meta = Meta::builder().append_sidecar(true).sidecar(SidecarMeta::builder().secret_mounts(secret_mounts()).build()).build();
    meta.pod_spec.automount_service_account_token = Some(true);
    let patch = compile(&meta);

    assert!(operations(&patch).iter().filter(|(_, path)| path.starts_with("/spec/volumes")).all(|operation| *operation == add("/spec/volumes/-")));
    let document = apply(&meta, &patch);
    assert_eq!(document["spec"]["volumes"].as_array().unwrap().len(), 3);
}

#[test]
fn test_tracing_backends_order() {
    let mut meta = Meta::builder()
        .append_sidecar(true)
        .sidecar(
            SidecarMeta::builder()
                .enable_jaeger_tracing(true)
                .jaeger_address("jaeger-collector.tracing")
                .jaeger_port("9411")
                .enable_datadog_tracing(true)
                .datadog_address("datadog-agent.monitoring")
                .datadog_port("8126")
                .build(),
        )
        .build();
    meta.pod_spec.automount_service_account_token = Some(true);
    let patch = compile(&meta);

    assert_eq!(
        operations(&patch),
        vec![
            add("/spec/initContainers"),
            add("/spec/containers/-"),
            add("/spec/volumes/-"),
            add("/spec/initContainers/-"),
            add("/spec/volumes/-"),
            add("/spec/initContainers/-"),
        ]
    );
    let values = values(&patch);
    assert_eq!(values[2]["name"], TracingBackend::Datadog.volume_name());
    assert_eq!(values[3]["name"], TracingBackend::Datadog.init_container_name());
    assert_eq!(values[4]["name"], TracingBackend::Jaeger.volume_name());
    assert_eq!(values[5]["name"], TracingBackend::Jaeger.init_container_name());
}

#[test]
fn test_tracing_creates_missing_volumes_and_sidecar_mounts_exist() {
    let meta = Meta::builder()
        .append_sidecar(true)
        .sidecar(
            SidecarMeta::builder()
                .enable_datadog_tracing(true)
                .datadog_address("datadog-agent")
                .datadog_port("8126")
                .secret_mounts(secret_mounts())
                .build(),
        )
        .build();
    let patch = compile(&meta);

    assert_eq!(
        operations(&patch),
        vec![
            add("/spec/initContainers"),
            add("/spec/containers/-"),
            add("/spec/volumes"),
            add("/spec/initContainers/-"),
            add("/spec/containers/1/volumeMounts/-"),
            add("/spec/volumes/-"),
            add("/spec/containers/1/volumeMounts/-"),
            add("/spec/volumes/-"),
        ]
    );

    let document = apply(&meta, &patch);
    let mounts: Vec<_> =
        document["spec"]["containers"][1]["volumeMounts"].as_array().unwrap().iter().map(|m| m["name"].as_str().unwrap().to_owned()).collect();
    assert_eq!(mounts, vec!["envoy-datadog-config", "tls-certs", "ca-bundle"]);
}

#[test]
fn test_image_pull_secret() {
    let meta = Meta::builder().append_sidecar(true).has_image_pull_secret(true).build();
    let patch = compile(&meta);
    assert_eq!(operations(&patch)[2], add("/spec/imagePullSecrets"));
    assert_eq!(values(&patch)[2], json!([{ "name": "appmesh-ecr-secret" }]));

    let meta = Meta::builder().append_sidecar(true).has_image_pull_secret(true).append_image_pull_secret(true).build();
    let patch = compile(&meta);
    assert_eq!(operations(&patch)[2], add("/spec/imagePullSecrets/-"));
    assert_eq!(values(&patch)[2], json!({ "name": "appmesh-ecr-secret" }));

    let document = apply(&meta, &patch);
    assert_eq!(document["spec"]["imagePullSecrets"].as_array().unwrap().len(), 2);

    let meta = Meta::builder().append_sidecar(true).append_image_pull_secret(true).build();
    assert!(operations(&compile(&meta)).iter().all(|(_, path)| !path.starts_with("/spec/imagePullSecrets")));
}

#[test]
fn test_generation_is_deterministic() {
    let mut meta = Meta::builder()
        .append_sidecar(true)
        .inject_fs_group(true)
        .has_image_pull_secret(true)
        .init(InitMeta::builder().ports("80,443").build())
        .sidecar(SidecarMeta::builder().enable_jaeger_tracing(true).jaeger_address("jaeger").jaeger_port("9411").secret_mounts(secret_mounts()).build())
        .build();
    meta.pod_metadata.labels = Some(BTreeMap::from([(FARGATE_PROFILE_LABEL.to_owned(), "fp-default".to_owned())]));

    let first = super::generate_patch(&meta).unwrap();
    let second = super::generate_patch(&meta).unwrap();
    assert_eq!(first, second);
    let _: Patch = serde_json::from_slice(&first).unwrap();
}

#[test]
fn test_inconsistent_container_placement_is_rejected() {
    let meta = Meta::builder().append_init(true).build();
    assert!(matches!(PodPatcher::new(TeraRenderer).compile(&meta), Err(PatchError::InconsistentContainerPlacement)));

    // No init container is injected in CNI mode, so the sidecar index is unambiguous.
    let mut meta = Meta::builder().append_init(true).build();
    meta.pod_metadata.annotations = Some(BTreeMap::from([(APPMESH_CNI_ANNOTATION.to_owned(), "enabled".to_owned())]));
    assert!(PodPatcher::new(TeraRenderer).compile(&meta).is_ok());
}

#[test]
fn test_rendering_failure_aborts() {
    let meta = Meta::builder().append_sidecar(true).init(InitMeta::builder().ports("80,http").build()).build();
    assert!(matches!(PodPatcher::new(TeraRenderer).compile(&meta), Err(PatchError::Render(RenderError::InvalidPortList(_)))));

    let meta = Meta::builder()
        .append_sidecar(true)
        .sidecar(SidecarMeta::builder().enable_datadog_tracing(true).datadog_address("datadog-agent").datadog_port("eighty").build())
        .build();
    assert!(matches!(super::generate_patch(&meta), Err(PatchError::Render(RenderError::InvalidPort { .. }))));
}

struct BrokenSecretRenderer;

impl FragmentRenderer for BrokenSecretRenderer {
    fn render_init(&self, init: &InitMeta) -> Result<String, RenderError> {
        TeraRenderer.render_init(init)
    }

    fn render_sidecars(&self, sidecar: &SidecarMeta) -> Result<Vec<String>, RenderError> {
        TeraRenderer.render_sidecars(sidecar)
    }

    fn render_tracing_volume(&self, backend: TracingBackend) -> Result<String, RenderError> {
        TeraRenderer.render_tracing_volume(backend)
    }

    fn render_tracing_init(&self, backend: TracingBackend, address: &str, port: &str) -> Result<String, RenderError> {
        TeraRenderer.render_tracing_init(backend, address, port)
    }

    fn render_secret_volume(&self, _secret_mount: &SecretMount) -> Result<String, RenderError> {
        Ok(r#"{"name": "#.to_owned())
    }

    fn render_secret_volume_mount(&self, secret_mount: &SecretMount) -> Result<String, RenderError> {
        TeraRenderer.render_secret_volume_mount(secret_mount)
    }
}

#[test]
fn test_malformed_fragment_aborts() {
    let meta = Meta::builder().append_sidecar(true).sidecar(SidecarMeta::builder().secret_mounts(secret_mounts()).build()).build();
    assert!(matches!(PodPatcher::new(BrokenSecretRenderer).compile(&meta), Err(PatchError::Fragment(_))));
}

struct NoSidecarRenderer;

impl FragmentRenderer for NoSidecarRenderer {
    fn render_init(&self, init: &InitMeta) -> Result<String, RenderError> {
        TeraRenderer.render_init(init)
    }

    fn render_sidecars(&self, _sidecar: &SidecarMeta) -> Result<Vec<String>, RenderError> {
        Ok(vec![])
    }

    fn render_tracing_volume(&self, backend: TracingBackend) -> Result<String, RenderError> {
        TeraRenderer.render_tracing_volume(backend)
    }

    fn render_tracing_init(&self, backend: TracingBackend, address: &str, port: &str) -> Result<String, RenderError> {
        TeraRenderer.render_tracing_init(backend, address, port)
    }

    fn render_secret_volume(&self, secret_mount: &SecretMount) -> Result<String, RenderError> {
        TeraRenderer.render_secret_volume(secret_mount)
    }

    fn render_secret_volume_mount(&self, secret_mount: &SecretMount) -> Result<String, RenderError> {
        TeraRenderer.render_secret_volume_mount(secret_mount)
    }
}

#[test]
fn test_missing_sidecar_aborts() {
    let meta = Meta::builder().sidecar(SidecarMeta::builder().secret_mounts(secret_mounts()).build()).build();
    assert!(matches!(PodPatcher::new(NoSidecarRenderer).compile(&meta), Err(PatchError::MissingSidecar)));

    let meta = Meta::builder().append_sidecar(true).build();
    assert!(matches!(PodPatcher::new(NoSidecarRenderer).compile(&meta), Err(PatchError::MissingSidecar)));
}

#[test]
pub fn test_meta_from_yaml() {
    let meta: Meta = serde_yaml::from_str(META_YAML).unwrap();
    let patch = compile(&meta);

    assert_eq!(
        operations(&patch),
        vec![
            add("/spec/initContainers/-"),
            add("/spec/securityContext/fsGroup"),
            add("/spec/containers/-"),
            add("/spec/containers/-"),
            add("/spec/imagePullSecrets"),
            add("/spec/containers/1/volumeMounts"),
            add("/spec/volumes/-"),
        ]
    );

    let document = apply(&meta, &patch);
    let containers: Vec<_> = document["spec"]["containers"].as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap().to_owned()).collect();
    assert_eq!(containers, vec!["app", "envoy", "xray-daemon"]);
    assert_eq!(document["spec"]["volumes"][0]["name"], "config");
    assert_eq!(document["spec"]["volumes"][1]["secret"]["secretName"], "colorteller-tls");
}

const META_YAML: &str = r"
appendInit: true
appendSidecar: true
hasImagePullSecret: true
injectFsGroup: true
init:
  ports: 9080, 9443
  egressIgnoredPorts: '22'
  ignoredIps: 169.254.169.254
sidecar:
  meshName: color-mesh
  virtualNodeName: colorteller-white
  region: us-west-2
  enableXrayTracing: true
  injectXraySidecar: true
  secretMounts:
  - secretName: colorteller-tls
    mountPath: /certs
podMetadata:
  name: colorteller-white-6d9f7c
  namespace: appmesh-demo
  annotations:
    kubectl.kubernetes.io/restartedAt: '2020-01-01T00:00:00Z'
podSpec:
  containers:
  - name: app
    image: colorteller:latest
  volumes:
  - name: config
    configMap:
      name: colorteller
";
