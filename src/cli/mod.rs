mod daemon;
mod session;
mod settings;

use anyhow::Result;
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::clock::{Clock, SystemClock};
use crate::core::config::AppConfig;
use crate::core::crypto::CryptoService;
use crate::core::detector::{ClientDetector, StandaloneDetector, select_detector};
use crate::core::finesse::{FinesseApi, FinesseClient};
use crate::core::monitor::{Monitor, MonitorDeps};
use crate::core::notify::{DesktopNotifier, NotificationDispatcher};
use crate::core::rate_limit::RateLimiter;
use crate::core::store::{STORE_FILE_NAME, Store};
use crate::core::terminal::{self, GuideSection, print_error};
use crate::platform::{NativePlatform, Platform, ensure_data_dir};

pub(crate) const LOG_FILE_NAME: &str = "finesse-watch.log";
pub(crate) const PID_FILE_NAME: &str = "finesse-watch.pid";

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Session")
        .command("login", "Log in to Finesse and start a session")
        .command("logout", "End the session and clear stored credentials")
        .command("status", "Show the agent's current state")
        .command("reasons", "List NOT_READY reason codes")
        .command("state ready", "Become READY")
        .command("state not-ready --reason <id>", "Pause with a reason code")
        .print();

    GuideSection::new("Monitoring")
        .command("run", "Monitor in the foreground until Ctrl+C")
        .command("start", "Start the background monitor")
        .command("stop", "Stop the background monitor")
        .command("restart", "Restart the background monitor")
        .command("logs", "Follow the monitor log")
        .print();

    GuideSection::new("Settings")
        .command("config show", "Show timers, schedule and notifications")
        .command("config timers", "--standard <min> --pause <min>")
        .command("config schedule", "--day <day> [--start HH:mm --end HH:mm] [--disable]")
        .command("config schedule", "--outside-hours on|off")
        .command("config notify", "[--desktop on|off] [--chat on|off] [--webhook URL]")
        .print();

    println!(
        "\n {} {} <command> [options] [--verbose]\n",
        style("Usage:").bold(),
        style("finesse-watch").green()
    );
}

/// Value following the first of `names` at or after `start`.
pub(crate) fn flag_value(args: &[String], start: usize, names: &[&str]) -> Option<String> {
    let mut i = start;
    while i < args.len() {
        if names.contains(&args[i].as_str()) {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

pub(crate) fn has_flag(args: &[String], start: usize, names: &[&str]) -> bool {
    args.iter()
        .skip(start)
        .any(|arg| names.contains(&arg.as_str()))
}

/// `on`/`off` style switch values.
pub(crate) fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Everything a command needs, wired from config and the data directory.
pub(crate) struct Context {
    pub data_dir: PathBuf,
    pub config: Arc<AppConfig>,
    pub store: Arc<Store>,
    pub monitor: Monitor,
}

impl Context {
    /// `watch_client` selects the browser-aware detector; one-shot commands
    /// skip the DevTools probe.
    pub async fn open(data_dir: &Path, watch_client: bool) -> Result<Self> {
        let config = Arc::new(AppConfig::load(data_dir)?);
        let crypto = Arc::new(CryptoService::new(&config.encryption_key)?);
        let store_path = data_dir.join(STORE_FILE_NAME);
        let store = Arc::new(Store::open(&store_path, crypto).await?);
        NativePlatform::restrict_file_permissions(&store_path);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let api: Arc<dyn FinesseApi> = Arc::new(FinesseClient::new(&config)?);
        let detector: Arc<dyn ClientDetector> = if watch_client {
            select_detector(&config, http.clone()).await
        } else {
            Arc::new(StandaloneDetector::new(
                config
                    .client_urls
                    .first()
                    .cloned()
                    .unwrap_or_else(|| config.primary_url.clone()),
            ))
        };
        let notifier = Arc::new(NotificationDispatcher::new(
            Arc::new(DesktopNotifier),
            http,
            config.webhook_host.clone(),
            store.load_notification_config().await?,
        ));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_secs),
            clock.clone(),
        ));

        let monitor = Monitor::new(MonitorDeps {
            config: config.clone(),
            api,
            store: store.clone(),
            detector,
            notifier,
            clock,
            limiter,
        });

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            store,
            monitor,
        })
    }

    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = has_flag(&args, 1, &["--verbose", "-v"]);
    let cmd = args.get(1).map(String::as_str).unwrap_or("");

    if matches!(cmd, "" | "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let data_dir = ensure_data_dir()?;
    let run_dir = data_dir.join("run");
    let log_file = run_dir.join(LOG_FILE_NAME);
    let pid_file = run_dir.join(PID_FILE_NAME);

    match cmd {
        "daemon-run" => crate::logging::init(Some(&log_file), verbose, true),
        "run" => crate::logging::init(Some(&log_file), verbose, false),
        _ => crate::logging::init(Some(&log_file), verbose, !verbose),
    }

    match cmd {
        "start" => return daemon::start(&run_dir, &pid_file, &log_file, verbose),
        "stop" => return daemon::stop(&pid_file),
        "restart" => return daemon::restart(),
        "logs" => return daemon::follow_logs(&log_file, &pid_file),
        _ => {}
    }

    let ctx = Context::open(&data_dir, matches!(cmd, "run" | "daemon-run")).await?;
    match cmd {
        "login" => session::login(&ctx, &args).await,
        "logout" => session::logout(&ctx).await,
        "status" => session::status(&ctx, &pid_file).await,
        "reasons" => session::reasons(&ctx).await,
        "state" => session::change_state(&ctx, &args).await,
        "run" => daemon::run_foreground(&ctx).await,
        "daemon-run" => daemon::run_daemon(&ctx, &pid_file).await,
        "config" => settings::run_config_command(&ctx, &args).await,
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
