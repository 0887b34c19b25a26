mod meta;

pub use meta::{InitMeta, Meta, SecretMount, SidecarMeta, TracingBackend};

pub const APPMESH_CNI_ANNOTATION: &str = "appmesh.k8s.aws/appmeshCNI";
pub const FARGATE_PROFILE_LABEL: &str = "eks.amazonaws.com/fargate-profile";

pub const APPMESH_PORTS_ANNOTATION: &str = "appmesh.k8s.aws/ports";
pub const APPMESH_EGRESS_IGNORED_IPS_ANNOTATION: &str = "appmesh.k8s.aws/egressIgnoredIPs";
pub const APPMESH_EGRESS_IGNORED_PORTS_ANNOTATION: &str = "appmesh.k8s.aws/egressIgnoredPorts";
pub const APPMESH_SIDECAR_INJECT_ANNOTATION: &str = "appmesh.k8s.aws/sidecarInjectorWebhook";
pub const APPMESH_IGNORED_UID_ANNOTATION: &str = "appmesh.k8s.aws/ignoredUID";
pub const APPMESH_PROXY_EGRESS_PORT_ANNOTATION: &str = "appmesh.k8s.aws/proxyEgressPort";
pub const APPMESH_PROXY_INGRESS_PORT_ANNOTATION: &str = "appmesh.k8s.aws/proxyIngressPort";

// Fixed by the App Mesh runtime.
pub const APPMESH_PROXY_UID: &str = "1337";
pub const APPMESH_PROXY_EGRESS_PORT: &str = "15001";
pub const APPMESH_PROXY_INGRESS_PORT: &str = "15000";

pub const ECR_SECRET_NAME: &str = "appmesh-ecr-secret";

/// Not configurable on purpose. Pods that need a specific group must set `fsGroup` themselves;
/// this only protects pods using IAM roles for service accounts that did not set one.
pub const DEFAULT_FS_GROUP: i64 = 1337;

pub const DEFAULT_CPU_REQUESTS: &str = "10m";
pub const DEFAULT_MEMORY_REQUESTS: &str = "32Mi";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_PROXY_INIT_IMAGE: &str = "840364872350.dkr.ecr.us-west-2.amazonaws.com/aws-appmesh-proxy-route-manager:v2";
pub const DEFAULT_ENVOY_IMAGE: &str = "840364872350.dkr.ecr.us-west-2.amazonaws.com/aws-appmesh-envoy:v1.12.2.1-prod";
pub const DEFAULT_XRAY_IMAGE: &str = "amazon/aws-xray-daemon";
pub const TRACING_CONFIG_INIT_IMAGE: &str = "busybox";
