use k8s_openapi::{api::core::v1::PodSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{
    APPMESH_CNI_ANNOTATION, DEFAULT_CPU_REQUESTS, DEFAULT_ENVOY_IMAGE, DEFAULT_LOG_LEVEL, DEFAULT_MEMORY_REQUESTS, DEFAULT_PROXY_INIT_IMAGE,
    DEFAULT_XRAY_IMAGE, FARGATE_PROFILE_LABEL,
};

fn default_cpu_requests() -> String {
    DEFAULT_CPU_REQUESTS.to_owned()
}

fn default_memory_requests() -> String {
    DEFAULT_MEMORY_REQUESTS.to_owned()
}

fn default_proxy_init_image() -> String {
    DEFAULT_PROXY_INIT_IMAGE.to_owned()
}

fn default_envoy_image() -> String {
    DEFAULT_ENVOY_IMAGE.to_owned()
}

fn default_xray_image() -> String {
    DEFAULT_XRAY_IMAGE.to_owned()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_owned()
}

/// Fully resolved description of one pod mutation.
///
/// The `append_*` and `has_*` flags are expected to agree with the pod snapshot carried in
/// `pod_metadata`/`pod_spec`; they are not re-derived here.
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    #[builder(default)]
    pub append_init: bool,
    #[serde(default)]
    #[builder(default)]
    pub append_sidecar: bool,
    #[serde(default)]
    #[builder(default)]
    pub append_image_pull_secret: bool,
    #[serde(default)]
    #[builder(default)]
    pub has_image_pull_secret: bool,
    #[serde(default)]
    #[builder(default)]
    pub inject_fs_group: bool,
    #[serde(default)]
    #[builder(default)]
    pub init: InitMeta,
    #[serde(default)]
    #[builder(default)]
    pub sidecar: SidecarMeta,
    #[serde(default)]
    #[builder(default)]
    pub pod_metadata: ObjectMeta,
    #[serde(default)]
    #[builder(default)]
    pub pod_spec: PodSpec,
}

impl Meta {
    /// CNI mode injects the proxy out-of-band, so only annotations are patched.
    ///
    /// An explicit CNI annotation wins; otherwise pods scheduled on a Fargate profile are CNI enabled.
    pub fn is_cni_enabled(&self) -> bool {
        if let Some(value) = self.pod_metadata.annotations.as_ref().and_then(|annotations| annotations.get(APPMESH_CNI_ANNOTATION)) {
            return value == "enabled";
        }
        self.pod_metadata.labels.as_ref().and_then(|labels| labels.get(FARGATE_PROFILE_LABEL)).is_some_and(|value| !value.is_empty())
    }

    /// The runtime mounts a service account token volume when automount is on, even though the submitted spec does not list it.
    pub fn has_volumes(&self) -> bool {
        let listed = self.pod_spec.volumes.as_ref().is_some_and(|volumes| !volumes.is_empty());
        listed || self.pod_spec.automount_service_account_token == Some(true)
    }

    pub fn pod_name(&self) -> &str {
        self.pod_metadata.name.as_deref().or(self.pod_metadata.generate_name.as_deref()).unwrap_or_default()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct InitMeta {
    #[serde(default = "default_proxy_init_image")]
    #[builder(default = default_proxy_init_image(), setter(into))]
    pub container_image: String,
    #[serde(default = "default_cpu_requests")]
    #[builder(default = default_cpu_requests(), setter(into))]
    pub cpu_requests: String,
    #[serde(default = "default_memory_requests")]
    #[builder(default = default_memory_requests(), setter(into))]
    pub memory_requests: String,
    /// Comma separated application ports redirected through the proxy.
    #[serde(default)]
    #[builder(default, setter(into))]
    pub ports: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub egress_ignored_ports: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub ignored_ips: String,
}

impl Default for InitMeta {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SidecarMeta {
    #[serde(default = "default_envoy_image")]
    #[builder(default = default_envoy_image(), setter(into))]
    pub container_image: String,
    #[serde(default = "default_cpu_requests")]
    #[builder(default = default_cpu_requests(), setter(into))]
    pub cpu_requests: String,
    #[serde(default = "default_memory_requests")]
    #[builder(default = default_memory_requests(), setter(into))]
    pub memory_requests: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub mesh_name: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub virtual_node_name: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub region: String,
    #[serde(default = "default_log_level")]
    #[builder(default = default_log_level(), setter(into))]
    pub log_level: String,

    #[serde(default)]
    #[builder(default)]
    pub enable_xray_tracing: bool,
    #[serde(default)]
    #[builder(default)]
    pub inject_xray_sidecar: bool,
    #[serde(default = "default_xray_image")]
    #[builder(default = default_xray_image(), setter(into))]
    pub xray_image: String,
    #[serde(default)]
    #[builder(default)]
    pub enable_stats_tags: bool,
    #[serde(default)]
    #[builder(default)]
    pub enable_statsd: bool,

    #[serde(default)]
    #[builder(default)]
    pub enable_datadog_tracing: bool,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub datadog_address: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub datadog_port: String,
    #[serde(default)]
    #[builder(default)]
    pub enable_jaeger_tracing: bool,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub jaeger_address: String,
    #[serde(default)]
    #[builder(default, setter(into))]
    pub jaeger_port: String,

    #[serde(default)]
    #[builder(default)]
    pub secret_mounts: Vec<SecretMount>,
}

impl Default for SidecarMeta {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SidecarMeta {
    /// Enabled tracing backends in injection order.
    pub fn tracing_backends(&self) -> Vec<TracingBackend> {
        let mut backends = vec![];
        if self.enable_datadog_tracing {
            backends.push(TracingBackend::Datadog);
        }
        if self.enable_jaeger_tracing {
            backends.push(TracingBackend::Jaeger);
        }
        backends
    }

    pub fn has_tracing(&self) -> bool {
        self.enable_datadog_tracing || self.enable_jaeger_tracing
    }

    pub fn tracing_endpoint(&self, backend: TracingBackend) -> (&str, &str) {
        match backend {
            TracingBackend::Datadog => (&self.datadog_address, &self.datadog_port),
            TracingBackend::Jaeger => (&self.jaeger_address, &self.jaeger_port),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct SecretMount {
    #[builder(setter(into))]
    pub secret_name: String,
    #[builder(setter(into))]
    pub mount_path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TracingBackend {
    Datadog,
    Jaeger,
}

impl TracingBackend {
    pub fn name(self) -> &'static str {
        match self {
            TracingBackend::Datadog => "datadog",
            TracingBackend::Jaeger => "jaeger",
        }
    }

    pub fn volume_name(self) -> String {
        format!("envoy-{}-config", self.name())
    }

    pub fn init_container_name(self) -> String {
        format!("inject-{}-config", self.name())
    }

    /// Directory the sidecar reads this backend's static config from.
    pub fn sidecar_mount_path(self) -> String {
        format!("/tmp/envoy/{}", self.name())
    }

    pub fn config_file(self) -> String {
        format!("{}/envoyconf.yaml", self.sidecar_mount_path())
    }
}

impl std::fmt::Display for TracingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
