//! Best-queue selection with priority downgrade.

use std::time::{Duration, Instant};

use super::{Reservation, TokenBucket};

/// Picks the queue in `[0, requested]` whose reservation has the lowest
/// delay, cancelling every other reservation made along the way.
///
/// Queues with higher indexes are higher priority. The scan starts at the
/// requested index and walks down, downgrading only on a strictly lower
/// delay, so equal delays keep the higher-priority queue. A zero delay ends
/// the scan early since nothing can beat it. Returns `None` when the
/// requested index is out of range or no queue can grant a slot; in that
/// case too every reservation minted here has been cancelled.
pub fn select(
    buckets: &[TokenBucket],
    requested: usize,
    now: Instant,
) -> Option<(Reservation<'_>, usize)> {
    if requested >= buckets.len() {
        return None;
    }

    let mut reservations: Vec<Option<Reservation<'_>>> = Vec::with_capacity(requested + 1);
    reservations.resize_with(requested + 1, || None);

    let mut best_index: Option<usize> = None;
    let mut best_delay: Option<Duration> = None; // None means infinite

    for i in (0..=requested).rev() {
        if best_delay == Some(Duration::ZERO) {
            break;
        }

        let reservation = buckets[i].reserve_at(now);
        let delay = reservation.delay_from(now);
        reservations[i] = Some(reservation);

        if delay_lt(delay, best_delay) {
            best_index = Some(i);
            best_delay = delay;
        }
    }

    // Every reservation except the winner goes back.
    for (i, slot) in reservations.iter_mut().enumerate() {
        if best_index == Some(i) {
            continue;
        }
        if let Some(reservation) = slot.as_mut() {
            reservation.cancel_at(now);
        }
    }

    let index = best_index?;
    let winner = reservations[index]
        .take()
        .expect("winning reservation was minted during the scan");
    Some((winner, index))
}

/// `a < b` where `None` stands for an infinite delay.
fn delay_lt(a: Option<Duration>, b: Option<Duration>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}
