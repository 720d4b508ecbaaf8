//! Shared token-bucket gate for outbound provider traffic.
//!
//! One gate is constructed per process and injected into every source
//! adapter, so all concurrent collection tasks share the same budget
//! against the external provider.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token bucket. `acquire` blocks the calling worker until a token is
/// available; tokens refill continuously at the configured rate.
pub struct RateGate {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<GateState>,
}

struct GateState {
    tokens: f64,
    last_refill: Instant,
}

impl RateGate {
    pub fn per_minute(rate_per_minute: u32) -> Self {
        let capacity = f64::from(rate_per_minute.max(1));
        RateGate {
            capacity,
            refill_per_sec: capacity / 60.0,
            state: Mutex::new(GateState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            std::thread::sleep(wait);
        }
    }

    /// Tokens currently in the bucket (observability only).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}
