//! A job that stops on a failed load and finishes when restarted.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use batchflow_core::prelude::*;

const DEFINITION: &str = r#"
name: import
transitions:
  - { from: extract, on: COMPLETED, next: load }
  - { from: load, on: FAILED, stop: { restart: load } }
  - { from: load, on: COMPLETED, next: report }
  - { from: report, end: {} }
"#;

// Fails halfway through its first run, then picks up from the saved offset.
#[derive(Debug, Default)]
struct LoadStep {
    failed_once: AtomicBool,
}

#[async_trait]
impl Step for LoadStep {
    async fn execute(
        &self,
        mut execution: StepExecution,
    ) -> Result<(StepExecution, FlowExecutionStatus)> {
        let offset: u64 = execution.context().get("offset")?.unwrap_or_default();
        let resumed = execution.context().is_truthy(RESTART_REQUESTED_KEY);
        println!("📥 Loading from offset {offset} (restart: {resumed})");

        if !self.failed_once.swap(true, Ordering::SeqCst) {
            execution.context_mut().put("offset", 500)?;
            println!("❌ Connection lost at offset 500");
            return Ok((execution, FlowExecutionStatus::failed()));
        }

        execution.context_mut().put("offset", 1000)?;
        Ok((execution, FlowExecutionStatus::completed()))
    }

    fn name(&self) -> String {
        "load".to_string()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    println!("🚀 Starting batchflow restart example");

    let registry = StateRegistry::new()
        .with(State::step(
            "extract",
            helpers::passthrough("extract", "COMPLETED"),
        ))
        .with(State::step("load", LoadStep::default()))
        .with(State::step(
            "report",
            helpers::passthrough("report", "COMPLETED"),
        ));
    let flow = FlowDefinition::from_yaml(DEFINITION)?.build(&registry)?;
    let job = FlowJob::new("import", Arc::new(flow));

    println!("\n🏃 First run...");
    let first = job.executor();
    let execution = job.execute(&first).await?;
    println!("Status: {}", execution.status);
    println!(
        "Resume from: {:?}",
        execution.context().get_str(RESUME_FROM_STATE_KEY)
    );
    println!(
        "Interrupted step: {:?}",
        execution.context().get_str(INTERRUPTED_STEP_KEY)
    );

    println!("\n🔁 Restarting...");
    let second = first.next_attempt().await?;
    let execution = job.execute(&second).await?;
    println!("Status: {}", execution.status);
    for step in &execution.step_executions {
        println!("  {} -> {}", step.step_name(), step.status());
    }

    println!("\n✅ Restart example completed!");

    Ok(())
}
