use console::{Emoji, style};

use crate::core::finesse::AgentStatus;
use crate::core::monitor::{ConnectionState, MonitorStatus};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static BELL: Emoji<'_, '_> = Emoji("🔔 ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_banner() {
    println!();
    println!(
        "{} {}",
        BELL,
        style("finesse-watch").bold().cyan()
    );
    println!(
        "{}\n",
        style("Keeps an eye on your Finesse agent state.").dim()
    );
}

/// State name colored by how urgent it is.
pub fn styled_state(status: &AgentStatus) -> String {
    let name = status.state.as_str();
    let styled = match name {
        "READY" => style(name).green().bold(),
        "NOT_READY" => style(name).yellow().bold(),
        "LOGOUT" => style(name).red().bold(),
        _ => style(name).cyan().bold(),
    };
    match (&status.reason_label, status.reason_code_id) {
        (Some(label), _) => format!("{} ({})", styled, label),
        (None, Some(id)) => format!("{} (reason {})", styled, id),
        (None, None) => styled.to_string(),
    }
}

pub fn print_agent_status(status: &AgentStatus) {
    GuideSection::new("Agent")
        .status("Name", &status.display_name())
        .status("State", &styled_state(status))
        .status("Extension", status.extension.as_deref().unwrap_or("-"))
        .status(
            "Since",
            status.state_change_time.as_deref().unwrap_or("-"),
        )
        .print();
}

pub fn print_monitor_status(status: &MonitorStatus) {
    let connection = match status.connection {
        ConnectionState::Connected => style("CONNECTED").green().bold(),
        ConnectionState::MonitoringPaused => style("PAUSED").yellow().bold(),
        ConnectionState::Error => style("ERROR").red().bold(),
        ConnectionState::Unknown => style("UNKNOWN").dim(),
    };
    let mut section = GuideSection::new("Monitor")
        .status("Phase", &format!("{:?}", status.phase))
        .status("Connection", &connection.to_string());
    if let Some(username) = &status.username {
        section = section.status("User", username);
    }
    if let Some(message) = &status.message {
        section = section.info(message);
    }
    section.print();
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Bye.").bold().cyan());
}

/// A titled block of aligned terminal lines, built up and printed at once.
pub struct GuideSection {
    title: String,
    lines: Vec<String>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines.push(format!(
            "  {:<28} {}",
            style(name).green(),
            style(description).dim()
        ));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines.push(format!(
            "  {} {}: {}",
            GEAR,
            style(label).bold().cyan(),
            value
        ));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.lines.push(format!("  {}", text));
        self
    }

    pub fn hint(mut self, command: &str, description: &str) -> Self {
        if description.is_empty() {
            self.lines.push(format!("  $ {}", style(command).cyan()));
        } else {
            self.lines.push(format!(
                "  $ {}  {}",
                style(command).cyan(),
                style(description).dim()
            ));
        }
        self
    }

    pub fn info(mut self, text: &str) -> Self {
        self.lines
            .push(format!("  {} {}", INFO_ICON, style(text).blue()));
        self
    }

    pub fn warn(mut self, text: &str) -> Self {
        self.lines
            .push(format!("  {} {}", WARN_ICON, style(text).yellow()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn print(&self) {
        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            println!("{}", line);
        }
    }
}
