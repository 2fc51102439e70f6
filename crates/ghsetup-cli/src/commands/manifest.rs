use anyhow::Result;
use console::{style, Term};
use ghsetup_auth::config::SetupConfig;
use ghsetup_auth::{AppManifest, GitHubWeb};

use crate::setup_ui::{print_step, ARROW};

/// The manifest a run would register, and where to submit it by hand.
pub fn render_manifest(config: &SetupConfig) -> Result<(String, String)> {
    let manifest = AppManifest::from_config(&config.app)
        .with_redirect_url(format!("http://localhost:{}", config.callback.port));
    let web = GitHubWeb::new(config.github.web_url.as_str(), config.app.org.clone());
    Ok((manifest.to_json_pretty()?, format!("{}/new", web.apps_page())))
}

pub fn print_manifest(config: &SetupConfig) -> Result<()> {
    let (json, target) = render_manifest(config)?;
    let term = Term::stdout();

    print_step(&term, 1, 2, "Manifest");
    term.write_line(&json)?;
    print_step(&term, 2, 2, "Submit as the `manifest` form field to");
    term.write_line(&format!("{}{}", ARROW, style(target).underlined()))?;
    Ok(())
}
