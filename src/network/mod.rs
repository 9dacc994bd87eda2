mod fetch;
mod policy;

pub use fetch::{FetchError, FetchRequest, GrantGuard, NetworkGate, NetworkGrant};
pub use policy::{AllowAll, AllowList, DenyAll, DomainRequest, NetworkPolicy};
