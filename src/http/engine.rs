//! Admission and reservation engine.

use std::future::Future;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use axum::extract::Request;
use axum::response::Response;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{BlitzError, Result};
use crate::http::Downstream;
use crate::limit::{select, DelayStats, TokenBucket};
use crate::token::Signer;

/// Header carrying a previously minted reservation token.
pub const RESERVATION_HEADER: &str = "X-Blitz-Reservation";

/// Header proposing a queue index for admission.
pub const QUEUE_HEADER: &str = "X-Blitz-Queue";

/// Snapshot of per-queue capacity and recent delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Whole tokens available per queue right now; negative means waiting.
    #[serde(rename = "Slots")]
    pub slots: Vec<i64>,

    /// Mean delay per queue over the stats window, in milliseconds.
    #[serde(rename = "Delays")]
    pub delays: Vec<i64>,
}

/// Response to a reservation mint request.
///
/// On failure `success` is false and everything else stays zeroed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReservationGrant {
    pub success: bool,
    pub queue: i64,
    pub delay_in_milliseconds: i64,
    #[serde(rename = "X-Blitz-Reservation")]
    pub token: String,
    pub token_valid_from_unix_milliseconds: i64,
    pub token_valid_until_unix_milliseconds: i64,
}

/// The admission engine: priority-ordered token buckets, per-queue delay
/// stats, and the signer backing reservation tokens.
///
/// One instance is shared by every request handler. The buckets and stats
/// rings guard themselves; the signer is read-only after construction.
pub struct Blitz<D> {
    every: Duration,
    limiters: Vec<TokenBucket>,
    stats: Vec<DelayStats>,
    signer: Signer,
    downstream: D,
}

impl<D: Downstream> Blitz<D> {
    /// Creates an engine with one token bucket per burst size.
    ///
    /// `rng` seeds the token keypair and is not used afterwards. `every` is
    /// the refill interval E: a queue with burst B refills at B/E tokens per
    /// second, and minted tokens stay valid for E past their due time.
    /// Queues with higher indexes are higher priority.
    pub fn new<R: CryptoRng + RngCore>(
        rng: &mut R,
        downstream: D,
        every: Duration,
        bursts: &[u64],
    ) -> Result<Self> {
        if bursts.is_empty() {
            return Err(BlitzError::NoQueues);
        }
        if every.is_zero() {
            return Err(BlitzError::Config("refill interval must be positive".into()));
        }

        let mut limiters = Vec::with_capacity(bursts.len());
        let mut stats = Vec::with_capacity(bursts.len());
        for (i, &burst) in bursts.iter().enumerate() {
            if burst == 0 {
                return Err(BlitzError::Config(format!(
                    "queue {i} must have a positive burst size"
                )));
            }
            limiters.push(TokenBucket::new(burst as f64 / every.as_secs_f64(), burst));
            stats.push(DelayStats::new(every * 10));
        }

        Ok(Self {
            every,
            limiters,
            stats,
            signer: Signer::new(rng),
            downstream,
        })
    }

    /// Number of configured queues.
    pub fn queues(&self) -> usize {
        self.limiters.len()
    }

    /// Per-queue free slots and mean recent delay.
    pub fn status(&self) -> StatusRecord {
        let slots = self
            .limiters
            .iter()
            .map(|limiter| limiter.tokens().floor() as i64)
            .collect();
        let delays = self
            .stats
            .iter()
            .map(|stats| (stats.average() / 1_000_000.0) as i64)
            .collect();
        StatusRecord { slots, delays }
    }

    /// Resolves the proposed queue header; missing, unparseable, or
    /// out-of-range values fall back to queue 0.
    pub fn clamp_queue(&self, header: Option<&str>) -> usize {
        header
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&queue| queue < self.limiters.len())
            .unwrap_or(0)
    }

    /// Mints a signed reservation on the best queue at or below `requested`.
    ///
    /// The winning reservation stays outstanding: the token is its
    /// externalized form, and the clock consumes the slot whether or not
    /// the client shows up.
    pub fn mint_reservation(&self, requested: usize) -> ReservationGrant {
        let now = Instant::now();

        let Some((mut reservation, queue)) = select(&self.limiters, requested, now) else {
            warn!(requested, "no queue can grant a reservation");
            return ReservationGrant::default();
        };
        let Some(delay) = reservation.delay_from(now) else {
            // A selected reservation is always finite; clean up regardless.
            reservation.cancel_at(now);
            warn!(queue, "selected reservation has infinite delay");
            return ReservationGrant::default();
        };

        let from_ms = unix_millis_now() + delay.as_millis() as u64;
        let until_ms = from_ms + self.every.as_millis() as u64;

        self.stats[queue].add(delay.as_nanos() as i64);
        debug!(
            queue,
            delay_ms = delay.as_millis() as u64,
            "minted reservation"
        );

        ReservationGrant {
            success: true,
            queue: queue as i64,
            delay_in_milliseconds: delay.as_millis() as i64,
            token: self.signer.encode(from_ms, until_ms),
            token_valid_from_unix_milliseconds: from_ms as i64,
            token_valid_until_unix_milliseconds: until_ms as i64,
        }
    }

    /// Validates a token and, when it is not yet due, waits until it is.
    ///
    /// A token is usable within `[validFrom, validUntil)`. `cancel` aborts
    /// a not-yet-due wait with [`BlitzError::RequestCancelled`].
    pub async fn use_reservation<F>(&self, token: &str, cancel: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (from_ms, until_ms) = self.signer.decode(token)?;
        let now_ms = unix_millis_now();

        if now_ms >= from_ms && now_ms < until_ms {
            return Ok(());
        }

        if now_ms < from_ms {
            let wait = Duration::from_millis(from_ms - now_ms);
            debug!(
                wait_ms = wait.as_millis() as u64,
                "reservation not yet due, holding request"
            );
            tokio::select! {
                _ = cancel => return Err(BlitzError::RequestCancelled),
                _ = sleep(wait) => return Ok(()),
            }
        }

        Err(BlitzError::ReservationExpired { from_ms, until_ms })
    }

    /// Admits a request with no token: picks a queue, records the delay,
    /// then holds the request until its slot is due.
    ///
    /// A cancelled wait still burned its slot; rolling the reservation back
    /// would let cancellation refill the bucket past the rate cap.
    pub async fn admit<F>(&self, requested: usize, cancel: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let now = Instant::now();

        let Some((reservation, queue)) = select(&self.limiters, requested, now) else {
            warn!(requested, "no queue can admit the request");
            return Err(BlitzError::InfiniteDelay);
        };
        let Some(delay) = reservation.delay_from(now) else {
            return Err(BlitzError::InfiniteDelay);
        };

        self.stats[queue].add(delay.as_nanos() as i64);
        debug!(
            queue,
            delay_ms = delay.as_millis() as u64,
            "admitting request after delay"
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel => return Err(BlitzError::RequestCancelled),
                _ = sleep(delay) => {}
            }
        }

        Ok(())
    }

    /// Strips the control headers and hands the request to the downstream.
    pub async fn forward(&self, mut req: Request) -> Response {
        req.headers_mut().remove(RESERVATION_HEADER);
        req.headers_mut().remove(QUEUE_HEADER);
        self.downstream.forward(req).await
    }
}

/// Milliseconds since the Unix epoch, UTC.
fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
