pub mod config;
pub mod dedup;
pub mod error;
pub mod facets;
pub mod health;
pub mod ingest;
pub mod normalize;
pub mod post;
pub mod publish;
pub mod redelivery;
pub mod schema;
pub mod server;
pub mod shutdown;
pub mod source;
