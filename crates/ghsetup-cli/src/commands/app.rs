use std::io::BufRead;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use console::Term;
use ghsetup_auth::oauth::{FlowDriver, FlowOptions, FlowResult};
use ghsetup_auth::{FlowMode, GhCommand, SetupConfig};
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::runtime::Handle;

use crate::setup_ui::{print_logo, ConsoleReporter};

#[derive(Args, Debug, Default)]
pub struct AppArgs {
    #[arg(long, value_parser = parse_mode, help = "How the manifest reaches GitHub: browser or form")]
    pub mode: Option<FlowMode>,

    #[arg(long, overrides_with = "no_manual_paste", help = "Also accept the redirect URL pasted on stdin")]
    pub manual_paste: bool,

    #[arg(long, help = "Only wait for the local redirect")]
    pub no_manual_paste: bool,

    #[arg(long, help = "Print the URL instead of opening a browser")]
    pub no_browser: bool,

    #[arg(long, help = "Local callback port")]
    pub port: Option<u16>,

    #[arg(long, help = "Seconds to wait for the redirect")]
    pub timeout_secs: Option<u64>,

    #[arg(long, help = "Register the app under this organization")]
    pub org: Option<String>,

    #[arg(long, help = "Keep waiting after a redirect without a usable code")]
    pub keep_listening: bool,
}

fn parse_mode(raw: &str) -> Result<FlowMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "browser" => Ok(FlowMode::Browser),
        "form" => Ok(FlowMode::Form),
        other => Err(format!("unknown mode '{other}', expected browser or form")),
    }
}

impl AppArgs {
    /// Flags win over the config file.
    pub fn apply(&self, config: &mut SetupConfig) {
        if let Some(mode) = self.mode {
            config.callback.mode = mode;
        }
        if self.manual_paste {
            config.callback.manual_paste = Some(true);
        }
        if self.no_manual_paste {
            config.callback.manual_paste = Some(false);
        }
        if let Some(port) = self.port {
            config.callback.port = port;
        }
        if let Some(secs) = self.timeout_secs {
            config.callback.timeout_secs = secs;
        }
        if let Some(org) = &self.org {
            config.app.org = Some(org.clone());
        }
    }

    pub fn options(&self, config: &SetupConfig) -> FlowOptions {
        FlowOptions {
            open_browser: !self.no_browser,
            keep_listening: self.keep_listening,
            ..FlowOptions::from_config(config)
        }
    }
}

pub async fn run_app(config: &SetupConfig, args: &AppArgs) -> Result<()> {
    let term = Term::stdout();
    print_logo(&term);

    let options = args.options(config);
    let gh = Arc::new(GhCommand::new(config.github.gh_binary.as_str()));
    let reporter = Arc::new(ConsoleReporter::new(term));
    let driver = FlowDriver::new(config, options, gh, reporter);

    let result = driver.run(Some(stdin_lines())).await?;
    match &result {
        FlowResult::Completed(report) => {
            tracing::info!(app_id = report.credentials.id, "github app setup finished")
        }
        other => tracing::warn!(result = ?other, "github app setup did not complete"),
    }
    Ok(())
}

/// Forwards stdin from a detached thread, so a pending read never holds the
/// runtime open once the flow has finished.
fn stdin_lines() -> BufReader<DuplexStream> {
    let (mut writer, reader) = tokio::io::duplex(4096);
    let handle = Handle::current();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let sent = handle.block_on(async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await
            });
            if sent.is_err() {
                break;
            }
        }
    });
    BufReader::new(reader)
}
