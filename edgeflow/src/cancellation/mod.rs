//! Shutdown signalling.

mod token;

pub use token::CancellationToken;
