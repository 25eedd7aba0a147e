//! Seam between the admission engine and whatever handles admitted requests.

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;

/// Handler that receives requests once Blitz admits them.
///
/// This abstracts over the real reverse proxy and test doubles so the
/// engine and the HTTP adapter can work with either.
#[async_trait]
pub trait Downstream: Send + Sync {
    /// Handles a fully-formed, already-admitted request.
    async fn forward(&self, req: Request) -> Response;
}
