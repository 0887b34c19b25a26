use std::net::IpAddr;

use itertools::Itertools;
use lazy_static::lazy_static;
use serde::Serialize;
use tera::Tera;
use tracing::{debug, error};

use super::{FragmentRenderer, RenderError};
use crate::common::{
    InitMeta, SecretMount, SidecarMeta, TracingBackend, APPMESH_PROXY_EGRESS_PORT, APPMESH_PROXY_INGRESS_PORT, APPMESH_PROXY_UID,
    TRACING_CONFIG_INIT_IMAGE,
};

const PROXY_INIT_TEMPLATE: &str = "proxy_init.json.tera";
const ENVOY_SIDECAR_TEMPLATE: &str = "envoy_sidecar.json.tera";
const XRAY_SIDECAR_TEMPLATE: &str = "xray_sidecar.json.tera";
const TRACING_VOLUME_TEMPLATE: &str = "tracing_volume.json.tera";
const TRACING_INIT_TEMPLATE: &str = "tracing_init.json.tera";
const DATADOG_ENVOY_TEMPLATE: &str = "datadog_envoy.yaml.tera";
const JAEGER_ENVOY_TEMPLATE: &str = "jaeger_envoy.yaml.tera";
const SECRET_VOLUME_TEMPLATE: &str = "secret_volume.json.tera";
const SECRET_VOLUME_MOUNT_TEMPLATE: &str = "secret_volume_mount.json.tera";

lazy_static! {
    static ref TEMPLATES: Tera = {
        let mut tera = Tera::default();
        let templates = [
            (PROXY_INIT_TEMPLATE, include_str!("../../templates/proxy_init.json.tera")),
            (ENVOY_SIDECAR_TEMPLATE, include_str!("../../templates/envoy_sidecar.json.tera")),
            (XRAY_SIDECAR_TEMPLATE, include_str!("../../templates/xray_sidecar.json.tera")),
            (TRACING_VOLUME_TEMPLATE, include_str!("../../templates/tracing_volume.json.tera")),
            (TRACING_INIT_TEMPLATE, include_str!("../../templates/tracing_init.json.tera")),
            (DATADOG_ENVOY_TEMPLATE, include_str!("../../templates/datadog_envoy.yaml.tera")),
            (JAEGER_ENVOY_TEMPLATE, include_str!("../../templates/jaeger_envoy.yaml.tera")),
            (SECRET_VOLUME_TEMPLATE, include_str!("../../templates/secret_volume.json.tera")),
            (SECRET_VOLUME_MOUNT_TEMPLATE, include_str!("../../templates/secret_volume_mount.json.tera")),
        ];
        match tera.add_raw_templates(templates) {
            Ok(()) => tera,
            Err(e) => {
                error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        }
    };
}

/// Renders pod fragments from the templates bundled with the crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct TeraRenderer;

impl FragmentRenderer for TeraRenderer {
    fn render_init(&self, init: &InitMeta) -> Result<String, RenderError> {
        #[derive(Serialize)]
        struct TeraInit<'a> {
            image: &'a str,
            cpu_requests: &'a str,
            memory_requests: &'a str,
            ports: String,
            egress_ignored_ports: String,
            ignored_ips: &'a str,
            proxy_uid: &'a str,
            proxy_ingress_port: &'a str,
            proxy_egress_port: &'a str,
        }

        let tera_init = TeraInit {
            image: &init.container_image,
            cpu_requests: &init.cpu_requests,
            memory_requests: &init.memory_requests,
            ports: normalize_port_list(&init.ports)?,
            egress_ignored_ports: normalize_port_list(&init.egress_ignored_ports)?,
            ignored_ips: init.ignored_ips.trim(),
            proxy_uid: APPMESH_PROXY_UID,
            proxy_ingress_port: APPMESH_PROXY_INGRESS_PORT,
            proxy_egress_port: APPMESH_PROXY_EGRESS_PORT,
        };
        let mut tera_context = tera::Context::new();
        tera_context.insert("init", &tera_init);
        Ok(TEMPLATES.render(PROXY_INIT_TEMPLATE, &tera_context)?)
    }

    fn render_sidecars(&self, sidecar: &SidecarMeta) -> Result<Vec<String>, RenderError> {
        #[derive(Serialize)]
        struct TeraMount {
            name: String,
            mount_path: String,
        }

        #[derive(Serialize)]
        struct TeraSidecar<'a> {
            image: &'a str,
            cpu_requests: &'a str,
            memory_requests: &'a str,
            virtual_node: String,
            log_level: &'a str,
            region: &'a str,
            proxy_uid: &'a str,
            enable_xray_tracing: bool,
            enable_stats_tags: bool,
            enable_statsd: bool,
            tracing_config_file: Option<String>,
            tracing_mounts: Vec<TeraMount>,
        }

        #[derive(Serialize)]
        struct TeraXray<'a> {
            image: &'a str,
            cpu_requests: &'a str,
            memory_requests: &'a str,
            proxy_uid: &'a str,
        }

        let backends = sidecar.tracing_backends();
        let tera_sidecar = TeraSidecar {
            image: &sidecar.container_image,
            cpu_requests: &sidecar.cpu_requests,
            memory_requests: &sidecar.memory_requests,
            virtual_node: format!("mesh/{}/virtualNode/{}", sidecar.mesh_name, sidecar.virtual_node_name),
            log_level: &sidecar.log_level,
            region: &sidecar.region,
            proxy_uid: APPMESH_PROXY_UID,
            enable_xray_tracing: sidecar.enable_xray_tracing,
            enable_stats_tags: sidecar.enable_stats_tags,
            enable_statsd: sidecar.enable_statsd,
            // Envoy reads a single tracing config; the last enabled backend wins.
            tracing_config_file: backends.last().map(|backend| backend.config_file()),
            tracing_mounts: backends
                .iter()
                .map(|backend| TeraMount {
                    name: backend.volume_name(),
                    mount_path: backend.sidecar_mount_path(),
                })
                .collect(),
        };
        let mut tera_context = tera::Context::new();
        tera_context.insert("sidecar", &tera_sidecar);
        let mut sidecars = vec![TEMPLATES.render(ENVOY_SIDECAR_TEMPLATE, &tera_context)?];

        if sidecar.inject_xray_sidecar {
            debug!("Rendering X-Ray daemon sidecar");
            let tera_xray = TeraXray {
                image: &sidecar.xray_image,
                cpu_requests: &sidecar.cpu_requests,
                memory_requests: &sidecar.memory_requests,
                proxy_uid: APPMESH_PROXY_UID,
            };
            let mut tera_context = tera::Context::new();
            tera_context.insert("xray", &tera_xray);
            sidecars.push(TEMPLATES.render(XRAY_SIDECAR_TEMPLATE, &tera_context)?);
        }
        Ok(sidecars)
    }

    fn render_tracing_volume(&self, backend: TracingBackend) -> Result<String, RenderError> {
        #[derive(Serialize)]
        struct TeraVolume {
            name: String,
        }

        let mut tera_context = tera::Context::new();
        tera_context.insert("volume", &TeraVolume { name: backend.volume_name() });
        Ok(TEMPLATES.render(TRACING_VOLUME_TEMPLATE, &tera_context)?)
    }

    fn render_tracing_init(&self, backend: TracingBackend, address: &str, port: &str) -> Result<String, RenderError> {
        #[derive(Serialize)]
        struct TeraEndpoint<'a> {
            address: &'a str,
            port: u16,
        }

        #[derive(Serialize)]
        struct TeraTracingInit<'a> {
            name: String,
            image: &'a str,
            script: String,
            volume_name: String,
        }

        let address = address.trim();
        if !is_valid_address(address) {
            return Err(RenderError::InvalidAddress { backend, address: address.to_owned() });
        }
        let port = port.trim().parse::<u16>().map_err(|_| RenderError::InvalidPort { backend, port: port.to_owned() })?;

        let mut tera_context = tera::Context::new();
        tera_context.insert("endpoint", &TeraEndpoint { address, port });
        let config_template = match backend {
            TracingBackend::Datadog => DATADOG_ENVOY_TEMPLATE,
            TracingBackend::Jaeger => JAEGER_ENVOY_TEMPLATE,
        };
        let envoy_config = TEMPLATES.render(config_template, &tera_context)?;

        let tera_tracing_init = TeraTracingInit {
            name: backend.init_container_name(),
            image: TRACING_CONFIG_INIT_IMAGE,
            script: format!("cat <<'EOF' > /tmp/envoy/envoyconf.yaml\n{}\nEOF\n", envoy_config.trim_end()),
            volume_name: backend.volume_name(),
        };
        let mut tera_context = tera::Context::new();
        tera_context.insert("tracing", &tera_tracing_init);
        Ok(TEMPLATES.render(TRACING_INIT_TEMPLATE, &tera_context)?)
    }

    fn render_secret_volume(&self, secret_mount: &SecretMount) -> Result<String, RenderError> {
        Ok(TEMPLATES.render(SECRET_VOLUME_TEMPLATE, &secret_context(secret_mount))?)
    }

    fn render_secret_volume_mount(&self, secret_mount: &SecretMount) -> Result<String, RenderError> {
        Ok(TEMPLATES.render(SECRET_VOLUME_MOUNT_TEMPLATE, &secret_context(secret_mount))?)
    }
}

fn secret_context(secret_mount: &SecretMount) -> tera::Context {
    #[derive(Serialize)]
    struct TeraSecretMount<'a> {
        secret_name: &'a str,
        mount_path: &'a str,
    }

    let mut tera_context = tera::Context::new();
    tera_context.insert(
        "secret",
        &TeraSecretMount {
            secret_name: &secret_mount.secret_name,
            mount_path: &secret_mount.mount_path,
        },
    );
    tera_context
}

/// Port lists are comma separated; blanks around entries are dropped.
fn normalize_port_list(ports: &str) -> Result<String, RenderError> {
    if ports.trim().is_empty() {
        return Ok(String::new());
    }
    let parsed = ports
        .split(',')
        .map(|port| port.trim().parse::<u16>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| RenderError::InvalidPortList(ports.to_owned()))?;
    Ok(parsed.iter().join(","))
}

/// IP literals, or DNS names resolved by the `strict_dns` cluster.
fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok()
        || (!address.is_empty() && address.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
}
