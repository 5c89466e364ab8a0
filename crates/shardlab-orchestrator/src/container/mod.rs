//! Container specifications and lifecycle tracking.

mod lifecycle;
mod spec;

pub use lifecycle::{ContainerHandle, ProcessState};
pub use spec::{ContainerSpec, ContainerSpecBuilder, DEFAULT_MEMORY_BYTES};
