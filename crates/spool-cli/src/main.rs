use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

use spool_core::{Manager, ManagerConfig, Options, State, Task, TaskBase, TaskError};

/// Greets someone after failing a configurable number of times.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HelloTask {
    #[serde(flatten)]
    base: TaskBase,
    name: String,
    #[serde(default)]
    failures: u32,
    #[serde(skip)]
    attempts: AtomicU32,
}

impl HelloTask {
    fn new(name: &str, failures: u32) -> Self {
        Self {
            name: name.to_string(),
            failures,
            ..Self::default()
        }
    }
}

#[async_trait]
impl Task for HelloTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    async fn run(&self) -> Result<(), TaskError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let ctx = self.base.ctx();
        for step in 1..=4 {
            tokio::select! {
                _ = ctx.cancelled() => return Err(TaskError::Canceled),
                _ = sleep(Duration::from_millis(25)) => {}
            }
            self.base.set_progress(f64::from(step) * 25.0);
        }

        if attempt < self.failures {
            return Err(TaskError::msg(format!(
                "intentional failure (left={})",
                self.failures - attempt
            )));
        }
        println!("Hello, {}!", self.name);
        Ok(())
    }

    fn name(&self) -> String {
        format!("hello [{}]", self.name)
    }

    fn status(&self) -> String {
        match self.base.state() {
            State::Running => "greeting".to_string(),
            _ => String::new(),
        }
    }

    async fn on_failed(&self) {
        tracing::warn!(task = %self.base.id(), name = %self.name, "giving up");
    }
}

/// Usage: `spool-cli [config.json]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // (A) options: a ManagerConfig file if given, built-in defaults otherwise
    let options = match std::env::args().nth(1) {
        Some(path) => {
            let config: ManagerConfig = serde_json::from_slice(&std::fs::read(&path)?)?;
            Options::from(config)
        }
        None => Options::new().with_workers(2).with_max_retry(2),
    };
    let manager: Manager<HelloTask> = Manager::new(options.with_name("hello"))?;

    // (B) tasks recovered from a snapshot are already queued; add fresh ones
    for (name, failures) in [("spool", 0), ("retry", 2), ("stubborn", 5), ("doomed", 0)] {
        let task = manager.add(HelloTask::new(name, failures));
        println!("added task: id={} name={}", task.base().id(), task.name());
    }

    // (C) cancel one while it is still queued or running
    if let Some(task) = manager.get_all().into_iter().find(|t| t.name == "doomed") {
        manager.cancel(&task.base().id());
    }

    // (D) wait for the pool to drain
    manager.wait().await;

    // (E) report
    for info in manager.infos() {
        println!(
            "final: id={} name={} state={} progress={:.0}% error={:?}",
            info.id, info.name, info.state, info.progress, info.error
        );
    }
    println!("counts: {:?}", manager.counts());

    manager.flush()?;
    Ok(())
}
