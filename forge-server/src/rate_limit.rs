//! Per-connection rate limiting: one token bucket per message class, plus a
//! violation window that closes the connection on repeated offenders.

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use protocol::MessageClass;
use protocol::limits::{RATE_WINDOW_SECS, VIOLATION_LIMIT};
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

type Limiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// The verdict for one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitOutcome {
    Allowed,
    /// Over the bucket: reply `RATE_LIMITED`, drop the message.
    Limited,
    /// Too many violations inside the window: close the connection.
    FatalViolation,
}

fn quota(class: MessageClass) -> Quota {
    let burst = NonZeroU32::new(class.burst()).expect("burst is never zero");
    let period = Duration::from_secs(RATE_WINDOW_SECS) / burst.get();
    Quota::with_period(period)
        .expect("period is never zero")
        .allow_burst(burst)
}

/// The limiter state of one authenticated connection. Generic over the
/// clock so tests can move time; live connections run on the default one.
pub struct ConnectionLimits<C: Clock = DefaultClock> {
    action: Limiter<C>,
    chat: Limiter<C>,
    dm_command: Limiter<C>,
    violations: Vec<Instant>,
}

impl Default for ConnectionLimits<DefaultClock> {
    fn default() -> Self {
        Self {
            action: RateLimiter::direct(quota(MessageClass::Action)),
            chat: RateLimiter::direct(quota(MessageClass::Chat)),
            dm_command: RateLimiter::direct(quota(MessageClass::DmCommand)),
            violations: Vec::new(),
        }
    }
}

impl<C: Clock> ConnectionLimits<C> {
    /// Builds the buckets against a caller-supplied clock.
    pub fn with_clock(clock: &C) -> Self {
        Self {
            action: RateLimiter::direct_with_clock(quota(MessageClass::Action), clock),
            chat: RateLimiter::direct_with_clock(quota(MessageClass::Chat), clock),
            dm_command: RateLimiter::direct_with_clock(quota(MessageClass::DmCommand), clock),
            violations: Vec::new(),
        }
    }

    /// Books one message of the given class.
    pub fn check(&mut self, class: MessageClass) -> LimitOutcome {
        let limiter = match class {
            MessageClass::Action => &self.action,
            MessageClass::Chat => &self.chat,
            MessageClass::DmCommand => &self.dm_command,
        };
        if limiter.check().is_ok() {
            return LimitOutcome::Allowed;
        }

        let now = Instant::now();
        let window = Duration::from_secs(RATE_WINDOW_SECS);
        self.violations.retain(|at| now.duration_since(*at) < window);
        self.violations.push(now);
        if self.violations.len() as u32 >= VIOLATION_LIMIT {
            LimitOutcome::FatalViolation
        } else {
            LimitOutcome::Limited
        }
    }
}
