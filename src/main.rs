use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::time::Instant;

use stampede::args::WorkerArgs;
use stampede::cron::{Cron, CronContext};
use stampede::error::AppResult;
use stampede::runner::Worker;

/// Built-in task used when the binary joins a coordinator without user
/// code: every iteration sleeps for the configured pause and records the
/// measured elapsed time as a success.
struct SmokeCron {
    pause: Duration,
}

#[async_trait]
impl Cron for SmokeCron {
    fn name(&self) -> &str {
        "idle"
    }

    fn weight(&self) -> f64 {
        1.0
    }

    fn clone_cron(&self) -> Box<dyn Cron> {
        Box::new(SmokeCron { pause: self.pause })
    }

    async fn execute(&mut self, ctx: &CronContext) -> AppResult<()> {
        let started = Instant::now();
        tokio::time::sleep(self.pause).await;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        ctx.record_success("sleep", self.name(), elapsed, 0);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = WorkerArgs::parse();
    stampede::logger::init_logging(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut worker = Worker::new(args.to_config())?;
        worker.register(vec![Box::new(SmokeCron {
            pause: Duration::from_millis(args.task_sleep_ms),
        })]);
        tracing::info!("Worker {} starting", worker.node_id());
        worker.run().await
    })?;

    Ok(())
}
