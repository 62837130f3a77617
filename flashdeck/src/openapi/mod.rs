//! OpenAPI documentation configuration.
//!
//! [`api::ApiDoc`] documents the flashcard API at `/api/v1/*`. It is served as JSON at
//! `/api/openapi.json` and rendered with Scalar at `/api/docs`.

pub mod api;

pub use api::ApiDoc;
