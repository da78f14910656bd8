//! Remote fleet API adapters.

pub mod aggregate_source;
pub mod http;

pub use aggregate_source::RemoteAggregateSource;
pub use http::HttpRemoteClient;
