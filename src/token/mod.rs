//! Signed reservation tokens.

mod signer;

pub use signer::{Signer, ENCODED_LENGTH, MESSAGE_LENGTH, SIGNED_LENGTH};
