//! Cooperative cancellation for stage workers.
//!
//! Each worker run receives its own [`CancellationToken`]. Stopping the
//! stage cancels that token; the worker observes it at the top of every
//! iteration and before every push retry.

mod token;

pub use token::CancellationToken;
