//! Apify actor client.
//!
//! The upstream scraping provider is consumed through the [`ActorClient`]
//! trait: start a run, poll it to a terminal status under a monotonic wall
//! budget, fetch dataset items with a limit. The HTTP implementation talks
//! to the Apify v2 API; [`mock::MockActorClient`] scripts runs for tests.

pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use client::{ActorClient, ApifyClient};
pub use error::ActorClientError;
pub use mock::MockActorClient;
pub use types::RunInfo;
