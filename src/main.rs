use anyhow::{Context, Result};
use std::{sync::Arc, thread};

use spacesync::backend::select_provider;
use spacesync::config::{SyncConfig, NOTIFICATION_NAME};
use spacesync::engine::SyncEngine;
use spacesync::icon::IconResolver;
use spacesync::logging;
use spacesync::monitor::EventSource;
use spacesync::notify::{send_notification, NotificationListener};
use spacesync::order::sort_spaces;
use spacesync::process::{SystemProbe, SystemRunner};
use spacesync::types::Snapshot;

fn notification_name(args: &[String]) -> &str {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--notify" {
            if let Some(value) = iter.next().filter(|v| !v.starts_with("--")) {
                return value;
            }
        }
    }
    NOTIFICATION_NAME
}

fn run_daemon(config: &SyncConfig) -> Result<()> {
    let provider = select_provider(&SystemProbe, Arc::new(SystemRunner::default()), config);
    #[cfg_attr(not(target_os = "macos"), allow(unused_mut))]
    let mut sources: Vec<Box<dyn EventSource>> = vec![Box::new(NotificationListener::new(
        &config.socket_path,
        &config.notification_name,
    ))];
    #[cfg(target_os = "macos")]
    sources.push(Box::new(spacesync::macos::WorkspaceNotifications));

    let engine = SyncEngine::start(provider, sources, config)?;
    let icons = IconResolver::system();
    let updates = engine.snapshot().subscribe();
    tracing::info!(
        "listening for {:?} on {}",
        config.notification_name,
        config.socket_path.display()
    );
    let reporter = thread::Builder::new()
        .name("spacesync-report".into())
        .spawn(move || {
            for snapshot in updates {
                let summary = snapshot
                    .spaces
                    .iter()
                    .map(|space| {
                        let icon = space
                            .top_window()
                            .and_then(|window| icons.icon(&window.app))
                            .map_or("", |_| "*");
                        format!("{}({}){icon}", space.id, space.windows.len())
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::info!("spaces: {summary}");
            }
        })
        .context("spawn snapshot reporter")?;

    #[cfg(target_os = "macos")]
    {
        // Workspace notifications are only posted while the main run loop runs.
        use objc2::MainThreadMarker;
        use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy};

        let mtm = MainThreadMarker::new().context("daemon must run on the main thread")?;
        let app = NSApplication::sharedApplication(mtm);
        let _ = app.setActivationPolicy(NSApplicationActivationPolicy::Accessory);
        app.run();
        drop(engine);
    }
    if reporter.join().is_err() {
        tracing::warn!("snapshot reporter panicked");
    }
    Ok(())
}

fn list_once(config: &SyncConfig) -> Result<()> {
    let snapshot = match select_provider(&SystemProbe, Arc::new(SystemRunner::default()), config) {
        Some(provider) => match provider.list_spaces() {
            Ok(spaces) => Snapshot {
                spaces: sort_spaces(spaces),
            },
            Err(err) => {
                tracing::warn!("{} unavailable: {err}", provider.kind());
                Snapshot::empty()
            }
        },
        None => Snapshot::empty(),
    };
    let json = serde_json::to_string_pretty(&snapshot).context("serialize snapshot")?;
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    logging::init();
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let config = SyncConfig::from_env();

    if args.iter().any(|arg| arg == "--notify") {
        send_notification(&config.socket_path, notification_name(&args))?;
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--list") {
        return list_once(&config);
    }
    if args.iter().any(|arg| arg == "--daemon") {
        return run_daemon(&config);
    }

    eprintln!(
        "Usage: spacesync --daemon\n       spacesync --notify [name]\n       spacesync --list\nSupported window managers: yabai, aerospace"
    );
    Ok(())
}
