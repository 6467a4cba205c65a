//! Run command - applies a command script to a fresh session.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::Context;
use crate::script::load_script;
use crate::session::{BatchOutcome, HeadlessSession};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON script of story command batches
    #[arg(short, long)]
    pub script: PathBuf,

    /// Stop at the first batch that does not succeed
    #[arg(long)]
    pub fail_fast: bool,
}

/// Run the run command.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let batches = load_script(&args.script)?;
    let session = HeadlessSession::new(ctx.config.clone());

    let outcomes = execute_batches(&session, batches, args.fail_fast).await;
    session.shutdown().await?;
    let outcomes = outcomes?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            print_outcome(outcome, ctx.verbose);
        }
    }

    let failed = outcomes.iter().filter(|o| !o.result.is_ok()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} batches failed", outcomes.len());
    }
    Ok(())
}

pub(crate) async fn execute_batches(
    session: &HeadlessSession,
    batches: Vec<crate::script::Batch>,
    fail_fast: bool,
) -> Result<Vec<BatchOutcome>> {
    let mut outcomes = Vec::with_capacity(batches.len());
    for batch in batches {
        let outcome = session.run_batch(batch).await?;
        let ok = outcome.result.is_ok();
        outcomes.push(outcome);
        if fail_fast && !ok {
            break;
        }
    }
    Ok(outcomes)
}

fn print_outcome(outcome: &BatchOutcome, verbose: bool) {
    let status = serde_json::to_value(outcome.result.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", outcome.result.status));

    match &outcome.state {
        Some(state) => println!("{:<24} {:<18} {}", outcome.story, status, state.as_str()),
        None => println!("{:<24} {}", outcome.story, status),
    }
    if let Some(message) = &outcome.result.error_message {
        println!("  {message}");
    }
    if verbose {
        for module in &outcome.running_modules {
            println!("  - {module}");
        }
    }
}
