//! Stories command - lists the stories a script leaves behind.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::Context;
use super::run::execute_batches;
use crate::script::load_script;
use crate::session::HeadlessSession;

/// Arguments for the stories command.
#[derive(Args, Debug)]
pub struct StoriesArgs {
    /// JSON script to apply before listing
    #[arg(short, long)]
    pub script: PathBuf,
}

/// Run the stories command.
pub async fn run(args: StoriesArgs, ctx: &Context) -> Result<()> {
    let batches = load_script(&args.script)?;
    let session = HeadlessSession::new(ctx.config.clone());

    // Failed batches still leave their story behind.
    let listed = match execute_batches(&session, batches, false).await {
        Ok(_) => session.stories().await,
        Err(e) => Err(e),
    };
    session.shutdown().await?;
    let stories = listed?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stories)?);
        return Ok(());
    }

    if stories.is_empty() {
        println!("No stories.");
        return Ok(());
    }
    println!("{:<24} {:<10} {:>7}  LAST FOCUS", "STORY", "STATE", "MODULES");
    for story in &stories {
        let focus = match story.last_focus_time {
            0 => "never".to_string(),
            millis => chrono::DateTime::from_timestamp_millis(millis)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| millis.to_string()),
        };
        println!(
            "{:<24} {:<10} {:>7}  {}",
            story.id,
            story.state.as_str(),
            story.modules,
            focus
        );
    }
    Ok(())
}
