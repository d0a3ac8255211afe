pub mod relay_services;
pub mod upstream_services;

pub use relay_services::RelayServices;
pub use upstream_services::DynUpstreamService;
