use anyhow::{Result, bail};
use console::style;
use inquire::PasswordDisplayMode;
use std::path::Path;
use std::time::Duration;

use super::{Context, flag_value};
use crate::core::error::WatchError;
use crate::core::finesse::{AgentState, Credentials};
use crate::core::monitor::{ConnectionState, SETTLE_DELAY};
use crate::core::terminal::{
    GuideSection, print_agent_status, print_error, print_info, print_step, print_success,
    print_warn,
};

/// `m:ss` countdown for lockout messages.
pub(crate) fn format_countdown(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn explain_login_error(err: &WatchError) -> String {
    match err {
        WatchError::AccountLocked { retry_after_secs } => format!(
            "Too many failed attempts. Try again in {}.",
            format_countdown(*retry_after_secs)
        ),
        WatchError::LoginFailed {
            reason,
            remaining_attempts,
        } => format!(
            "{} ({} attempt(s) left before the account is locked)",
            explain_login_error(reason),
            remaining_attempts
        ),
        WatchError::Auth => "Invalid username or password.".to_string(),
        WatchError::NotFound => "Agent not found on the Finesse server.".to_string(),
        WatchError::RateLimited { retry_after_ms } => format!(
            "Too many requests. Wait {}s and retry.",
            retry_after_ms.div_ceil(1000)
        ),
        other if other.is_connectivity() => {
            format!("Could not reach the Finesse server ({}).", other)
        }
        other => other.to_string(),
    }
}

pub async fn login(ctx: &Context, args: &[String]) -> Result<()> {
    let username = match flag_value(args, 2, &["--user", "-u"]) {
        Some(user) => user,
        None => inquire::Text::new("Email:")
            .with_help_message("Your Finesse login email")
            .prompt()?,
    };
    let agent_id = match flag_value(args, 2, &["--agent-id", "-a"]) {
        Some(id) => id,
        None => inquire::Text::new("Agent ID:")
            .with_help_message("Format 00.000.000")
            .prompt()?,
    };
    let password = inquire::Password::new("Password:")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;

    let credentials = Credentials::new(username, agent_id, password);
    print_step("Connecting to Finesse...");
    match ctx.monitor.login(credentials).await {
        Ok(status) => {
            print_success(&format!("Logged in as {}", status.display_name()));
            print_agent_status(&status);
            println!();
            if super::daemon::running_pid(&ctx.run_dir().join(super::PID_FILE_NAME)).is_none() {
                print_info(&format!(
                    "Run {} to keep monitoring in the background.",
                    style("finesse-watch start").cyan().bold()
                ));
            }
            ctx.monitor.shutdown().await;
            Ok(())
        }
        Err(e) => {
            ctx.monitor.shutdown().await;
            print_error(&explain_login_error(&e));
            bail!("login failed")
        }
    }
}

pub async fn logout(ctx: &Context) -> Result<()> {
    ctx.monitor.logout().await?;
    print_success("Logged out. Stored credentials were removed.");
    Ok(())
}

async fn attached(ctx: &Context) -> Result<bool> {
    match ctx.monitor.attach().await {
        Ok(_) => Ok(true),
        Err(WatchError::NotLoggedIn) => {
            print_warn("Not logged in. Run 'finesse-watch login' first.");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn status(ctx: &Context, pid_file: &Path) -> Result<()> {
    let daemon = match super::daemon::running_pid(pid_file) {
        Some(pid) => format!("{} (PID {})", style("RUNNING").green().bold(), pid),
        None => style("STOPPED").red().bold().to_string(),
    };
    let timers = ctx
        .store
        .load_timer_settings(&ctx.config.timer_bounds)
        .await?;
    GuideSection::new("Monitor")
        .status("Daemon", &daemon)
        .status(
            "Timers",
            &format!(
                "poll every {} min, pause alert after {} min",
                timers.standard_timer, timers.pause_timer
            ),
        )
        .print();

    if !attached(ctx).await? {
        return Ok(());
    }
    match ctx.monitor.fetch_status().await {
        Ok(status) => print_agent_status(&status),
        Err(e) => {
            print_error(&explain_login_error(&e));
            if let Some(last) = ctx.store.load_agent_status().await? {
                print_info("Last known state:");
                print_agent_status(&last);
            }
        }
    }
    println!();
    Ok(())
}

pub async fn reasons(ctx: &Context) -> Result<()> {
    if !attached(ctx).await? {
        return Ok(());
    }
    let codes = ctx.monitor.reason_codes().await?;
    let mut section = GuideSection::new("NOT_READY reasons");
    if codes.is_empty() {
        section = section.warn("The server returned no reason codes.");
    }
    for code in &codes {
        section = section.command(&code.id.to_string(), &code.label);
    }
    section
        .blank()
        .hint("finesse-watch state not-ready --reason <id>", "")
        .print();
    println!();
    Ok(())
}

/// `ready`, `not-ready` or a raw Finesse state name.
pub(crate) fn parse_target_state(raw: &str) -> Option<AgentState> {
    match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
        "ready" => Some(AgentState::Ready),
        "not-ready" | "notready" | "pause" => Some(AgentState::NotReady),
        "logout" => Some(AgentState::Logout),
        _ => None,
    }
}

pub async fn change_state(ctx: &Context, args: &[String]) -> Result<()> {
    let Some(state) = args.get(2).and_then(|raw| parse_target_state(raw)) else {
        print_error("Expected: state ready | state not-ready --reason <id>");
        return Ok(());
    };
    let reason = match flag_value(args, 3, &["--reason", "-r"]) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| anyhow::anyhow!("reason must be a number, got '{}'", raw))?,
        ),
        None => None,
    };
    if !attached(ctx).await? {
        return Ok(());
    }

    let mut updates = ctx.monitor.subscribe();
    ctx.monitor.change_agent_state(state.clone(), reason).await?;
    print_info(&format!("Requested {}; waiting for the server to confirm...", state));

    let settled = tokio::time::timeout(SETTLE_DELAY + Duration::from_secs(10), async {
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().clone();
            if status.agent.is_some() || status.connection == ConnectionState::Error {
                return Some(status);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    match settled.and_then(|s| s.agent) {
        Some(agent) => {
            if agent.state == state {
                print_success("State changed.");
            } else {
                print_warn("The server reports a different state than requested.");
            }
            print_agent_status(&agent);
        }
        None => print_warn("Could not confirm the new state; check 'finesse-watch status'."),
    }
    ctx.monitor.shutdown().await;
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_pads_seconds() {
        assert_eq!(format_countdown(900), "15:00");
        assert_eq!(format_countdown(61), "1:01");
        assert_eq!(format_countdown(0), "0:00");
    }

    #[test]
    fn target_state_aliases() {
        assert_eq!(parse_target_state("ready"), Some(AgentState::Ready));
        assert_eq!(parse_target_state("NOT_READY"), Some(AgentState::NotReady));
        assert_eq!(parse_target_state("not-ready"), Some(AgentState::NotReady));
        assert_eq!(parse_target_state("talking"), None);
    }

    #[test]
    fn login_failure_mentions_remaining_attempts() {
        let err = WatchError::LoginFailed {
            reason: Box::new(WatchError::Auth),
            remaining_attempts: 3,
        };
        let text = explain_login_error(&err);
        assert!(text.starts_with("Invalid username or password."));
        assert!(text.contains("3 attempt(s)"));

        let locked = WatchError::AccountLocked {
            retry_after_secs: 125,
        };
        assert!(explain_login_error(&locked).contains("2:05"));
    }
}
