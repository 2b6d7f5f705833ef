//! fleet-converge — polling against eventually consistent provider state.
//!
//! Every wait step of the rollout is one call to [`Poller::poll_until`]:
//! evaluate a condition against a fresh remote read, sleep a fixed
//! interval if it does not hold yet, give up once the time budget is spent.
//!
//! ```text
//! t=0      evaluate ── converged? ──▶ Converged
//!             │ no / remote error
//!          sleep(interval)
//!          elapsed ≥ budget? ──▶ TimedOut(last observed state)
//!             │ no
//!          evaluate ...
//! ```
//!
//! Time comes from a [`Clock`], so tests can run the full ten-minute
//! budget instantly with [`ManualClock`].

pub mod clock;
pub mod poller;

pub use clock::{Clock, ManualClock, TokioClock};
pub use poller::{Observation, PollOutcome, Poller};
