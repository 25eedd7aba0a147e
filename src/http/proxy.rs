//! Single-host reverse proxy used as the default downstream.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{uri, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::error;

use crate::error::{BlitzError, Result};
use crate::http::Downstream;

/// Forwards admitted requests to a single upstream host.
///
/// The request keeps its method, headers, path and query; only scheme and
/// authority are rewritten to point at the upstream.
pub struct ReverseProxy {
    client: Client<HttpConnector, Body>,
    scheme: uri::Scheme,
    authority: uri::Authority,
}

impl ReverseProxy {
    /// Creates a proxy for the given upstream URL, e.g. `http://127.0.0.1:3000`.
    pub fn new(upstream: &str) -> Result<Self> {
        let target: Uri = upstream
            .parse()
            .map_err(|_| BlitzError::Config(format!("invalid upstream url: {upstream}")))?;
        let scheme = target
            .scheme()
            .cloned()
            .ok_or_else(|| BlitzError::Config(format!("upstream url needs a scheme: {upstream}")))?;
        let authority = target
            .authority()
            .cloned()
            .ok_or_else(|| BlitzError::Config(format!("upstream url needs a host: {upstream}")))?;

        Ok(Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            scheme,
            authority,
        })
    }
}

#[async_trait]
impl Downstream for ReverseProxy {
    async fn forward(&self, req: Request) -> Response {
        let (mut parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_owned();

        parts.uri = match Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
        {
            Ok(uri) => uri,
            Err(e) => {
                error!(error = %e, "failed to build upstream uri");
                return (StatusCode::BAD_GATEWAY, "Bad Gateway\n").into_response();
            }
        };

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => response.map(Body::new),
            Err(e) => {
                error!(error = %e, "upstream request failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway\n").into_response()
            }
        }
    }
}
