//! Network implementations of the chat backend

pub mod graphql;

pub use graphql::{GraphqlBackend, GraphqlConfig};
