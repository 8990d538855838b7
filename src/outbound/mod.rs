//! Adapters implementing the [`crate::domain::ports`] traits against
//! real infrastructure: PostgreSQL, the RSS gateway, the model-serving
//! endpoint, image hosts, and the downstream note service.

pub mod gateway;
pub mod image;
pub mod model_client;
pub mod note_publisher;
pub mod persistence;
