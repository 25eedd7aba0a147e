//! Token bucket with cancelable reservations.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A token bucket that grants slots ahead of time.
///
/// The bucket holds up to `burst` tokens and refills at a constant rate,
/// tracking fractional tokens to avoid quantization drift. `reserve` always
/// debits the budget immediately, which may push it negative; the returned
/// [`Reservation`] carries the delay until the budget recovers. A
/// reservation that goes unused can be cancelled to return its token, as
/// long as no later reservation has already consumed the bucket past it.
///
/// The bucket is its own critical section; it can be shared across tasks.
pub struct TokenBucket {
    /// Refill rate in tokens per second.
    rate: f64,
    /// Maximum number of tokens the bucket can hold.
    burst: u64,
    state: Mutex<State>,
}

struct State {
    /// Current token budget; negative when reservations outrun the refill.
    tokens: f64,
    /// Instant the budget was last advanced to.
    last: Instant,
    /// Due time of the latest reservation handed out.
    last_event: Instant,
}

impl TokenBucket {
    /// Creates a full bucket refilling at `rate` tokens per second.
    pub fn new(rate: f64, burst: u64) -> Self {
        let now = Instant::now();
        Self {
            rate,
            burst,
            state: Mutex::new(State {
                tokens: burst as f64,
                last: now,
                last_event: now,
            }),
        }
    }

    /// Maximum number of tokens the bucket can hold.
    pub fn burst(&self) -> u64 {
        self.burst
    }

    /// Current token budget, possibly negative.
    pub fn tokens(&self) -> f64 {
        let state = self.state.lock().unwrap();
        self.advanced_tokens(&state, Instant::now())
    }

    /// Reserves one token as of the current time.
    pub fn reserve(&self) -> Reservation<'_> {
        self.reserve_at(Instant::now())
    }

    /// Reserves one token as of `now`.
    ///
    /// Passing an explicit instant keeps delays comparable when several
    /// buckets are scanned in a single pass.
    pub fn reserve_at(&self, now: Instant) -> Reservation<'_> {
        // A zero-burst bucket can never grant anything.
        if self.burst == 0 {
            return Reservation {
                bucket: self,
                ok: false,
                time_to_act: now,
                cancelled: false,
            };
        }

        let mut state = self.state.lock().unwrap();
        self.advance(&mut state, now);

        let tokens = state.tokens - 1.0;
        let wait = if tokens < 0.0 {
            self.duration_from_tokens(-tokens)
        } else {
            Duration::ZERO
        };
        let time_to_act = now + wait;

        state.tokens = tokens;
        state.last_event = time_to_act;

        Reservation {
            bucket: self,
            ok: true,
            time_to_act,
            cancelled: false,
        }
    }

    /// Moves the budget forward to `now`, capping at the burst size.
    fn advance(&self, state: &mut State, now: Instant) {
        state.tokens = self.advanced_tokens(state, now);
        if now > state.last {
            state.last = now;
        }
    }

    fn advanced_tokens(&self, state: &State, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last);
        (state.tokens + self.tokens_from_duration(elapsed)).min(self.burst as f64)
    }

    fn tokens_from_duration(&self, d: Duration) -> f64 {
        d.as_secs_f64() * self.rate
    }

    fn duration_from_tokens(&self, tokens: f64) -> Duration {
        Duration::from_secs_f64(tokens / self.rate)
    }
}

/// A slot handed out by [`TokenBucket::reserve`].
///
/// The token is already debited; the reservation only records when it
/// becomes due and how to give it back.
pub struct Reservation<'a> {
    bucket: &'a TokenBucket,
    ok: bool,
    time_to_act: Instant,
    cancelled: bool,
}

impl Reservation<'_> {
    /// Whether the bucket can ever satisfy this reservation.
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Delay until the slot is due; `None` means it can never be granted.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_from(Instant::now())
    }

    /// Delay measured from an explicit instant.
    pub fn delay_from(&self, now: Instant) -> Option<Duration> {
        if !self.ok {
            return None;
        }
        Some(self.time_to_act.saturating_duration_since(now))
    }

    /// Cancels the reservation as of the current time.
    pub fn cancel(&mut self) {
        self.cancel_at(Instant::now());
    }

    /// Cancels the reservation as of `now`, returning the token unless time
    /// has already consumed it or a later reservation depends on it.
    /// Idempotent.
    pub fn cancel_at(&mut self, now: Instant) {
        if !self.ok || self.cancelled {
            return;
        }
        self.cancelled = true;

        // A slot already consumed by time passing stays consumed.
        if now >= self.time_to_act {
            return;
        }

        let bucket = self.bucket;
        let mut state = bucket.state.lock().unwrap();

        // Tokens granted after this reservation stay spent; only what is
        // left of our own token comes back.
        let later = state.last_event.saturating_duration_since(self.time_to_act);
        let restore = 1.0 - bucket.tokens_from_duration(later);
        if restore <= 0.0 {
            return;
        }

        bucket.advance(&mut state, now);
        state.tokens = (state.tokens + restore).min(bucket.burst as f64);

        if state.last_event == self.time_to_act {
            if let Some(prev) = self
                .time_to_act
                .checked_sub(bucket.duration_from_tokens(1.0))
            {
                if prev >= now {
                    state.last_event = prev;
                }
            }
        }
    }
}
