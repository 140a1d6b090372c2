use anyhow::{Result, anyhow};
use console::style;

use super::{Context, flag_value, has_flag, parse_switch};
use crate::core::schedule::{ScheduleSettings, WorkSchedule, day_name, parse_day};
use crate::core::settings::{NotificationConfig, TimerSettings};
use crate::core::terminal::{GuideSection, print_error, print_success};

pub async fn run_config_command(ctx: &Context, args: &[String]) -> Result<()> {
    match args.get(2).map(String::as_str).unwrap_or("") {
        "show" | "" => show(ctx).await,
        "timers" => timers(ctx, args).await,
        "schedule" => schedule(ctx, args).await,
        "notify" => notify(ctx, args).await,
        other => {
            print_error(&format!("Unknown config command: {}", other));
            GuideSection::new("finesse-watch config")
                .command("show", "Show current settings")
                .command("timers", "--standard <min> --pause <min>")
                .command("schedule", "--day <day> [--start HH:mm --end HH:mm] [--disable]")
                .command("schedule", "--outside-hours on|off")
                .command("notify", "[--desktop on|off] [--chat on|off] [--webhook URL]")
                .print();
            println!();
            Ok(())
        }
    }
}

fn on_off(value: bool) -> String {
    if value {
        style("on").green().to_string()
    } else {
        style("off").dim().to_string()
    }
}

async fn show(ctx: &Context) -> Result<()> {
    let bounds = ctx.config.timer_bounds;
    let timers = ctx.store.load_timer_settings(&bounds).await?;
    let schedule = ctx.store.load_schedule_settings().await?;
    let notify = ctx.store.load_notification_config().await?;

    GuideSection::new("Timers")
        .status(
            "Standard",
            &format!(
                "{} min ({}-{})",
                timers.standard_timer, bounds.standard_min, bounds.standard_max
            ),
        )
        .status(
            "Pause",
            &format!(
                "{} min ({}-{})",
                timers.pause_timer, bounds.pause_min, bounds.pause_max
            ),
        )
        .print();

    let mut section = GuideSection::new("Work schedule");
    for day in 0u8..7 {
        let line = match schedule.entry_for(day) {
            Some(entry) if entry.enabled => format!("{} - {}", entry.start_time, entry.end_time),
            _ => style("off").dim().to_string(),
        };
        section = section.status(day_name(day), &line);
    }
    section
        .status("Alert outside hours", &on_off(schedule.notify_outside_hours))
        .print();

    GuideSection::new("Notifications")
        .status("Desktop", &on_off(notify.windows_notification))
        .status("Google Chat", &on_off(notify.google_chat_notification))
        .status(
            "Webhook",
            notify.google_chat_webhook.as_deref().unwrap_or("-"),
        )
        .print();
    println!();
    Ok(())
}

fn parse_minutes(raw: Option<String>, flag: &str, current: u32) -> Result<u32> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} expects whole minutes, got '{}'", flag, raw)),
        None => Ok(current),
    }
}

async fn timers(ctx: &Context, args: &[String]) -> Result<()> {
    let current = ctx
        .store
        .load_timer_settings(&ctx.config.timer_bounds)
        .await?;
    let settings = TimerSettings {
        standard_timer: parse_minutes(
            flag_value(args, 3, &["--standard", "-s"]),
            "--standard",
            current.standard_timer,
        )?,
        pause_timer: parse_minutes(
            flag_value(args, 3, &["--pause", "-p"]),
            "--pause",
            current.pause_timer,
        )?,
    };
    ctx.monitor.update_timer_settings(settings).await?;
    print_success(&format!(
        "Timers saved: poll every {} min, pause alert after {} min.",
        settings.standard_timer, settings.pause_timer
    ));
    Ok(())
}

/// Apply `--day/--start/--end/--disable/--outside-hours` to `settings`.
pub(crate) fn apply_schedule_flags(
    mut settings: ScheduleSettings,
    args: &[String],
) -> Result<ScheduleSettings> {
    if let Some(raw) = flag_value(args, 3, &["--outside-hours"]) {
        settings.notify_outside_hours =
            parse_switch(&raw).ok_or_else(|| anyhow!("--outside-hours expects on or off"))?;
    }

    if let Some(raw_day) = flag_value(args, 3, &["--day", "-d"]) {
        let day = parse_day(&raw_day).ok_or_else(|| anyhow!("unknown day '{}'", raw_day))?;
        let existing = settings.entry_for(day).cloned();
        let mut entry = existing.unwrap_or(WorkSchedule {
            day_of_week: day,
            enabled: false,
            start_time: "08:00".to_string(),
            end_time: "18:00".to_string(),
        });
        if let Some(start) = flag_value(args, 3, &["--start"]) {
            entry.start_time = start;
        }
        if let Some(end) = flag_value(args, 3, &["--end"]) {
            entry.end_time = end;
        }
        entry.enabled = !has_flag(args, 3, &["--disable"]);
        settings.upsert(entry);
    }
    Ok(settings)
}

async fn schedule(ctx: &Context, args: &[String]) -> Result<()> {
    let current = ctx.store.load_schedule_settings().await?;
    let updated = apply_schedule_flags(current.clone(), args)?;
    if updated == current {
        print_error("Nothing to change. Pass --day or --outside-hours.");
        return Ok(());
    }
    ctx.monitor.update_schedule_settings(updated).await?;
    print_success("Work schedule saved.");
    Ok(())
}

async fn notify(ctx: &Context, args: &[String]) -> Result<()> {
    let mut config: NotificationConfig = ctx.store.load_notification_config().await?;
    if let Some(raw) = flag_value(args, 3, &["--desktop"]) {
        config.windows_notification =
            parse_switch(&raw).ok_or_else(|| anyhow!("--desktop expects on or off"))?;
    }
    if let Some(raw) = flag_value(args, 3, &["--chat"]) {
        config.google_chat_notification =
            parse_switch(&raw).ok_or_else(|| anyhow!("--chat expects on or off"))?;
    }
    if let Some(url) = flag_value(args, 3, &["--webhook"]) {
        config.google_chat_webhook = Some(url.trim().to_string()).filter(|u| !u.is_empty());
    }
    ctx.monitor.update_notification_config(config).await?;
    print_success("Notification settings saved.");
    Ok(())
}
