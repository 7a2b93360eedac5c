// Shared foundation for the captain recommender: configuration, the
// request-scoped data model, and the error taxonomy.

pub mod config;
pub mod error;
pub mod model;
