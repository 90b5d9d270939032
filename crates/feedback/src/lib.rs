//! Human-in-the-loop feedback broker.
//!
//! One pending request per (job, phase); each request resolves exactly once:
//! response, timeout, or cancellation. Requests are persisted so a restart
//! can recover or expire them.

pub mod coordinator;
pub mod error;
pub mod metrics;

pub use coordinator::{FeedbackCoordinator, FeedbackOutcome, ParsedFeedback, RequestParams};
pub use error::{FeedbackError, Result};
pub use metrics::FeedbackMetrics;
