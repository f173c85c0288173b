//! Package repositories and the local package cache
//!
//! Transports move bytes to and from one server, the client implements
//! fallback and publishing across servers, and the cache stores what was
//! fetched.

pub mod cache;
pub mod client;
pub mod transport;

pub use cache::PackageCache;
pub use client::RepositoryClient;
