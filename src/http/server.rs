//! HTTP adapter: routes the control path and forwards everything else.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{BlitzError, Result};
use crate::http::{Blitz, Downstream, QUEUE_HEADER, RESERVATION_HEADER};

/// Shared state for the router: the engine plus a shutdown watch that
/// cancels in-flight waits.
struct AppState<D> {
    engine: Arc<Blitz<D>>,
    shutdown: watch::Receiver<bool>,
}

impl<D> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<D> AppState<D> {
    /// Resolves once the server starts shutting down.
    async fn cancelled(&self) {
        let mut shutdown = self.shutdown.clone();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Builds the Blitz router around an engine.
///
/// `GET /blitz/` returns the status snapshot, `POST /blitz/` mints a
/// reservation, other methods there get a 405. Every other path is either
/// a reservation use (when the token header is present) or a transparent
/// wait, and forwards downstream once admitted.
pub fn router<D: Downstream + 'static>(
    engine: Arc<Blitz<D>>,
    shutdown: watch::Receiver<bool>,
) -> Router {
    let state = AppState { engine, shutdown };
    Router::new()
        .route("/blitz/", get(status_handler::<D>).post(mint_handler::<D>))
        .fallback(forward_handler::<D>)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status_handler<D: Downstream + 'static>(
    State(state): State<AppState<D>>,
) -> Response {
    Json(state.engine.status()).into_response()
}

async fn mint_handler<D: Downstream + 'static>(
    State(state): State<AppState<D>>,
    req: Request,
) -> Response {
    let queue = state.engine.clamp_queue(header_str(&req, QUEUE_HEADER));
    Json(state.engine.mint_reservation(queue)).into_response()
}

async fn forward_handler<D: Downstream + 'static>(
    State(state): State<AppState<D>>,
    req: Request,
) -> Response {
    let engine = &state.engine;

    // A reservation header means the client already waited its turn;
    // validate the token instead of going through the buckets again.
    // Presence alone decides the path: a value that is not valid header
    // text can never decode, and the empty string fails the same format
    // check.
    if req.headers().contains_key(RESERVATION_HEADER) {
        let token = header_str(&req, RESERVATION_HEADER)
            .unwrap_or_default()
            .to_owned();
        return match engine.use_reservation(&token, state.cancelled()).await {
            Ok(()) => engine.forward(req).await,
            Err(err) => {
                (StatusCode::BAD_REQUEST, format!("Bad Request: {err}\n")).into_response()
            }
        };
    }

    let queue = engine.clamp_queue(header_str(&req, QUEUE_HEADER));
    match engine.admit(queue, state.cancelled()).await {
        Ok(()) => engine.forward(req).await,
        Err(BlitzError::RequestCancelled) => {
            (StatusCode::BAD_GATEWAY, "Request cancelled by client").into_response()
        }
        Err(err) => (StatusCode::BAD_GATEWAY, err.to_string()).into_response(),
    }
}

fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

/// HTTP server wrapping the admission engine.
pub struct BlitzServer<D> {
    /// Address to bind to
    addr: SocketAddr,
    /// The shared engine instance
    engine: Arc<Blitz<D>>,
}

impl<D: Downstream + 'static> BlitzServer<D> {
    /// Creates a server for the given bind address and engine.
    pub fn new(addr: SocketAddr, engine: Arc<Blitz<D>>) -> Self {
        Self { addr, engine }
    }

    /// Starts the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Starts the server with graceful shutdown.
    ///
    /// When `signal` resolves the listener stops accepting and every
    /// in-flight wait is cancelled so held connections drain quickly.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = watch::channel(false);
        let app = router(self.engine, rx);

        info!(addr = %self.addr, "starting blitz server");

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                info!("shutdown signal received, cancelling pending waits");
                let _ = tx.send(true);
            })
            .await
            .map_err(|e| {
                error!(error = %e, "http server failed");
                BlitzError::Io(e)
            })
    }
}
