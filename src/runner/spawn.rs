use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tracing::{debug, info};

use crate::cron::Cron;
use crate::message::{Message, Payload, kind};
use crate::rate::RateLimiter;
use crate::runner::state::{State, StateCell};
use crate::scheduler::Scheduler;
use crate::transport::TransportSender;

/// Everything the hatch task needs; it runs detached so `stop` frames can
/// interrupt it through the state cell.
pub(super) struct HatchContext {
    pub(super) templates: Vec<Box<dyn Cron>>,
    pub(super) num_clients: u64,
    pub(super) hatch_rate: f64,
    pub(super) scheduler: Arc<Scheduler>,
    pub(super) state: Arc<StateCell>,
    pub(super) actual_clients: Arc<AtomicU64>,
    pub(super) sender: TransportSender,
    pub(super) node_id: String,
}

/// Distribute `num_clients` across prototypes by weight share, rounding to
/// nearest. A zero weight sum falls back to floor division with the
/// remainder discarded.
pub(super) fn allocate(weights: &[f64], num_clients: u64) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let weight_sum: f64 = weights.iter().sum();
    let prototype_count = u64::try_from(weights.len()).unwrap_or(u64::MAX);

    weights
        .iter()
        .map(|&weight| {
            if weight_sum == 0.0 {
                num_clients.checked_div(prototype_count).unwrap_or(0)
            } else {
                round_to_u64((num_clients as f64) * (weight / weight_sum))
            }
        })
        .collect()
}

fn round_to_u64(value: f64) -> u64 {
    if value <= 0.0 {
        0
    } else if value >= u64::MAX as f64 {
        u64::MAX
    } else {
        value.round() as u64
    }
}

/// The hatching procedure: pace clone submissions through a rate limiter,
/// abort if the runner was stopped mid-spawn, and announce completion only
/// if this epoch still owns the state machine.
pub(super) async fn run_hatch(ctx: HatchContext) {
    let HatchContext {
        templates,
        num_clients,
        hatch_rate,
        scheduler,
        state,
        actual_clients,
        sender,
        node_id,
    } = ctx;

    info!(
        "Hatching and swarming {} clients at the rate of {} clients/s",
        num_clients, hatch_rate
    );
    let limiter = RateLimiter::new(hatch_rate);
    let weights: Vec<f64> = templates.iter().map(|cron| cron.weight()).collect();
    let counts = allocate(&weights, num_clients);

    for (template, amount) in templates.iter().zip(counts) {
        info!("> {}={}", template.name(), amount);
        for _ in 0..amount {
            limiter.acquire().await;
            if state.load() == State::Stopped {
                debug!("Hatching aborted: runner stopped mid-spawn");
                return;
            }
            let mut clone = template.clone_cron();
            let cron_ctx = scheduler.context();
            clone.initialize(&cron_ctx).await;
            scheduler.submit(clone).await;
            actual_clients.fetch_add(1, Ordering::AcqRel);
        }
    }

    // A stop that raced the last submission wins the state; no completion
    // frame in that case.
    if state.transition(State::Hatching, State::Running) {
        info!("Hatch completed");
        let mut data = Payload::new();
        data.insert("count".to_owned(), Value::from(num_clients));
        sender.send(Message::new(kind::HATCH_COMPLETE, Some(data), &node_id));
    }
}
