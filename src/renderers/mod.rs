mod tera_renderer;

use thiserror::Error;
pub use tera_renderer::TeraRenderer;

use crate::common::{InitMeta, SecretMount, SidecarMeta, TracingBackend};

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid port list {0:?}")]
    InvalidPortList(String),
    #[error("invalid {backend} port {port:?}")]
    InvalidPort { backend: TracingBackend, port: String },
    #[error("invalid {backend} address {address:?}")]
    InvalidAddress { backend: TracingBackend, address: String },
    #[error("template error {0}")]
    Template(#[from] tera::Error),
}

/// Produces the JSON fragments embedded into the pod patch.
///
/// Every method returns the serialized JSON text of a single object; the patch compiler embeds it without
/// interpreting its content.
pub trait FragmentRenderer {
    fn render_init(&self, init: &InitMeta) -> Result<String, RenderError>;

    /// Sidecar containers in the order they are added to the pod, the Envoy proxy first.
    fn render_sidecars(&self, sidecar: &SidecarMeta) -> Result<Vec<String>, RenderError>;

    fn render_tracing_volume(&self, backend: TracingBackend) -> Result<String, RenderError>;

    /// Init container writing the static Envoy tracing config of `backend`.
    fn render_tracing_init(&self, backend: TracingBackend, address: &str, port: &str) -> Result<String, RenderError>;

    fn render_secret_volume(&self, secret_mount: &SecretMount) -> Result<String, RenderError>;

    fn render_secret_volume_mount(&self, secret_mount: &SecretMount) -> Result<String, RenderError>;
}
