//! Container runtime backends.

mod docker;
mod memory;
mod r#trait;

pub use docker::{DockerRuntime, DockerRuntimeConfig};
pub use memory::{ExecResponder, MemoryRuntime};
pub use r#trait::{ContainerRuntime, ExecOutput};
