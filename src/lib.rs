pub mod common;
pub mod patchers;
pub mod renderers;

pub use common::{InitMeta, Meta, SecretMount, SidecarMeta, TracingBackend};
pub use patchers::{generate_patch, PatchError, PodPatcher};
pub use renderers::{FragmentRenderer, RenderError, TeraRenderer};

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
