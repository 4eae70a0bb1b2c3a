mod profiles;
mod registry;

pub use profiles::{ProfileRegistry, TargetModelProfile};
pub use registry::{Domain, DomainConfig, DomainRegistry, GENERIC_PERSONA};
