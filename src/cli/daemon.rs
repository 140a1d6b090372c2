use anyhow::Result;
use console::style;
use std::path::Path;
use tracing::{info, warn};

use super::Context;
use crate::core::monitor::{MonitorStatus, Phase};
use crate::core::terminal::{
    GuideSection, print_error, print_info, print_monitor_status, print_warn, styled_state,
};
use crate::platform::{NativePlatform, Platform};

/// Pid recorded in `pid_file` if that process is still alive. A stale file
/// is removed.
pub(crate) fn running_pid(pid_file: &Path) -> Option<String> {
    let pid = std::fs::read_to_string(pid_file).ok()?.trim().to_string();
    if !pid.is_empty() && NativePlatform::is_process_alive(&pid) {
        return Some(pid);
    }
    std::fs::remove_file(pid_file).ok();
    None
}

pub fn start(run_dir: &Path, pid_file: &Path, log_path: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(run_dir)?;
    NativePlatform::restrict_dir_permissions(run_dir);
    if let Some(pid) = running_pid(pid_file) {
        print_warn(&format!(
            "Monitor is already running (PID {}). Use 'finesse-watch stop' first.",
            pid
        ));
        return Ok(());
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    NativePlatform::restrict_file_permissions(log_path);

    let exe = std::env::current_exe()?;
    let mut child_cmd = std::process::Command::new(exe);
    child_cmd.arg("daemon-run");
    if verbose {
        child_cmd.arg("--verbose");
    }
    let child = child_cmd
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, child.id().to_string())?;

    GuideSection::new("Monitor Started")
        .status(
            "Status",
            &format!(
                "{} (PID {})",
                style("RUNNING").green().bold(),
                style(child.id()).dim()
            ),
        )
        .status("Log", &log_path.display().to_string())
        .blank()
        .info(&format!(
            "Run {} to follow it.",
            style("finesse-watch logs").cyan().bold()
        ))
        .print();
    println!();
    Ok(())
}

pub fn stop(pid_file: &Path) -> Result<()> {
    match running_pid(pid_file) {
        Some(pid) => {
            NativePlatform::kill_process(&pid)?;
            std::fs::remove_file(pid_file).ok();
            GuideSection::new("Monitor Stopped")
                .status(
                    "Status",
                    &format!(
                        "{} (was PID {})",
                        style("STOPPED").red().bold(),
                        style(&pid).dim()
                    ),
                )
                .print();
            println!();
        }
        None => print_info("Monitor is not currently running."),
    }
    Ok(())
}

pub fn restart() -> Result<()> {
    let exe = std::env::current_exe()?;
    let _ = std::process::Command::new(&exe).arg("stop").status();
    let _ = std::process::Command::new(&exe).arg("start").status();
    Ok(())
}

pub fn follow_logs(log_path: &Path, pid_file: &Path) -> Result<()> {
    if !log_path.exists() {
        print_error(&format!(
            "Log file not found at {}",
            style(log_path.display()).dim()
        ));
        return Ok(());
    }
    let mut section = GuideSection::new("Live Logs").text(&format!(
        "Following {} - press {} to stop.",
        style(log_path.display()).cyan(),
        style("Ctrl+C").bold().yellow()
    ));
    if running_pid(pid_file).is_none() {
        section = section.warn("Monitor is not running; showing the last lines.");
    }
    section.print();
    println!();
    let mut child = NativePlatform::tail_file(log_path)?;
    let _ = child.wait()?;
    Ok(())
}

/// One line per change the user would notice.
fn status_line(status: &MonitorStatus) -> String {
    let agent = status
        .agent
        .as_ref()
        .map(styled_state)
        .unwrap_or_else(|| "-".to_string());
    match &status.message {
        Some(message) => format!("{:?} | {} | {}", status.phase, agent, message),
        None => format!("{:?} | {}", status.phase, agent),
    }
}

pub async fn run_foreground(ctx: &Context) -> Result<()> {
    let resumed = ctx.monitor.start().await?;
    if resumed.is_none() && ctx.monitor.status().phase == Phase::Idle {
        print_warn("No active session. Run 'finesse-watch login' in another terminal.");
    }
    print_monitor_status(&ctx.monitor.status());
    let timers = ctx.monitor.timer_settings().await;
    print_info(&format!(
        "Polling every {} min; pause alert after {} min.",
        timers.standard_timer, timers.pause_timer
    ));
    println!(
        "\n  Press {} to stop.\n",
        style("Ctrl+C").bold().yellow()
    );

    let mut updates = ctx.monitor.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = String::new();
        while updates.changed().await.is_ok() {
            let line = status_line(&updates.borrow_and_update());
            if line != last {
                println!("  {}", line);
                last = line;
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    printer.abort();
    ctx.monitor.shutdown().await;
    Ok(())
}

pub async fn run_daemon(ctx: &Context, pid_file: &Path) -> Result<()> {
    info!("Monitor daemon starting (PID {})", std::process::id());
    if let Err(e) = ctx.monitor.start().await {
        warn!("Could not resume the stored session: {}", e);
    }
    terminated().await?;
    info!("Monitor daemon stopping");
    ctx.monitor.shutdown().await;
    if running_pid(pid_file).is_some_and(|pid| pid == std::process::id().to_string()) {
        std::fs::remove_file(pid_file).ok();
    }
    Ok(())
}

#[cfg(unix)]
async fn terminated() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = term.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn terminated() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
