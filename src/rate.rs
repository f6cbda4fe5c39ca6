use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

const REFILL_PERIOD: Duration = Duration::from_secs(1);

/// Token-bucket gate with a steady-state capacity of one second of tokens.
///
/// The bucket starts with a single token and is refilled once per second by
/// a background task; fractional rates carry a remainder across ticks. A
/// zero or negative rate disables the gate entirely.
pub(crate) struct RateLimiter {
    gate: Option<Gate>,
}

struct Gate {
    semaphore: Arc<Semaphore>,
    refill: JoinHandle<()>,
}

impl RateLimiter {
    pub(crate) fn new(rate_per_sec: f64) -> Self {
        if rate_per_sec <= 0.0 {
            return Self { gate: None };
        }

        let capacity = to_tokens(rate_per_sec.ceil()).max(1);
        let semaphore = Arc::new(Semaphore::new(1));
        let refill = spawn_refill(semaphore.clone(), rate_per_sec, capacity);
        Self {
            gate: Some(Gate { semaphore, refill }),
        }
    }

    /// Wait until one token is available. Returns immediately when the gate
    /// is disabled.
    pub(crate) async fn acquire(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.semaphore.acquire().await {
                permit.forget();
            }
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.gate.is_some()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(gate) = &self.gate {
            gate.refill.abort();
        }
    }
}

fn spawn_refill(semaphore: Arc<Semaphore>, rate_per_sec: f64, capacity: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval_at(Instant::now() + REFILL_PERIOD, REFILL_PERIOD);
        let mut carry = 0.0_f64;
        loop {
            tick.tick().await;
            carry += rate_per_sec;
            let grant = carry.floor();
            carry -= grant;

            let available = semaphore.available_permits();
            let headroom = capacity.saturating_sub(available);
            let add = to_tokens(grant).min(headroom);
            if add > 0 {
                semaphore.add_permits(add);
            }
        }
    })
}

fn to_tokens(value: f64) -> usize {
    if value <= 0.0 {
        0
    } else if value >= 1_000_000_000.0 {
        1_000_000_000
    } else {
        value as usize
    }
}
