use console::{style, Emoji, Term};
use ghsetup_auth::FlowReporter;

pub static CHECKMARK: Emoji<'_, '_> = Emoji("✅ ", "√ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "x ");
pub static ARROW: Emoji<'_, '_> = Emoji("➜  ", "-> ");

pub fn print_logo(term: &Term) {
    let logo = r#"
  ┌─────────────────────────┐
  │   github app  setup     │
  └─────────────────────────┘
"#;
    let _ = term.write_line(&format!("{}", style(logo).cyan()));
}

pub fn print_step(term: &Term, current: usize, total: usize, title: &str) {
    let _ = term.write_line(&format!(
        "\n{} {}",
        style(format!("[{}/{}]", current, total)).bold().cyan(),
        style(title).bold()
    ));
}

/// Operator output on the terminal.
pub struct ConsoleReporter {
    term: Term,
}

impl ConsoleReporter {
    pub fn new(term: Term) -> Self {
        Self { term }
    }
}

impl FlowReporter for ConsoleReporter {
    fn info(&self, message: &str) {
        let _ = self.term.write_line(message);
    }

    fn success(&self, message: &str) {
        let _ = self
            .term
            .write_line(&format!("{} {}", CHECKMARK, style(message).green()));
    }

    fn failure(&self, message: &str) {
        let _ = self
            .term
            .write_line(&format!("{} {}", CROSS, style(message).red()));
    }
}
