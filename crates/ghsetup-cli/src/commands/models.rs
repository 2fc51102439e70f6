use std::sync::Arc;

use anyhow::{Context, Result};
use console::Term;
use ghsetup_auth::{GhCommand, ModelsResult, ModelsSetup, SetupConfig};

use crate::setup_ui::ConsoleReporter;

pub async fn run_models(config: &SetupConfig) -> Result<()> {
    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let setup = ModelsSetup::new(
        Arc::new(GhCommand::new(config.github.gh_binary.as_str())),
        http,
        config.models.clone(),
        config.secrets.repo.clone(),
        Arc::new(ConsoleReporter::new(Term::stdout())),
    );

    let result = setup.run().await?;
    if result != ModelsResult::Configured {
        tracing::warn!(result = ?result, "github models setup did not complete");
    }
    Ok(())
}
