//! HTTP surface: admission engine, router, and the reverse-proxy downstream.

mod downstream;
mod engine;
mod proxy;
mod server;

pub use downstream::Downstream;
pub use engine::{Blitz, ReservationGrant, StatusRecord, QUEUE_HEADER, RESERVATION_HEADER};
pub use proxy::ReverseProxy;
pub use server::{router, BlitzServer};
