//! Wiring of the engine to the macOS backend.
//!
//! The main thread owns the notification observers and runs the main run
//! loop; the engine and its helpers run on a tokio runtime in a worker thread.

use std::{path::PathBuf, thread};

use config::Settings;
use keyfocus_engine::{Command, Engine, EngineCfg, Error, Notice, Result};
use mac_input::WorkspaceObservers;
use objc2::MainThreadMarker;
use tokio::{
    runtime::Builder,
    signal::{
        self,
        unix::{SignalKind, signal},
    },
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tracing::{debug, error, info, warn};

/// Run until interrupted. Must be called on the main thread.
pub fn run(cfg: EngineCfg, config_path: PathBuf) -> Result<()> {
    let Some(mtm) = MainThreadMarker::new() else {
        return Err(Error::Msg("keyfocus must run on the main thread".into()));
    };
    if !mac_input::accessibility_ok() {
        return Err(Error::PermissionDenied);
    }

    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (notice_tx, notice_rx) = mpsc::unbounded_channel();

    mac_input::set_sink(ev_tx);
    let observers = WorkspaceObservers::install(mtm);
    let engine = Engine::new(mac_input::system_deps(), cfg, notice_tx);

    let rt = Builder::new_multi_thread()
        .enable_all()
        .thread_name("keyfocus-engine")
        .build()?;

    let worker = thread::Builder::new()
        .name("keyfocus-runtime".into())
        .spawn(move || {
            rt.block_on(async move {
                let attached = engine.start();
                info!(attached, mode = %engine.mode(), "keyfocus started");
                tokio::spawn(persist_notices(notice_rx, config_path.clone()));
                tokio::spawn(forward_signals(cmd_tx, config_path));
                if let Err(e) = engine.run(ev_rx, cmd_rx).await {
                    error!(error = %e, "engine stopped with error");
                }
            });
            mac_input::stop_main();
        })?;

    mac_input::run_current();

    drop(observers);
    mac_input::clear_sink();
    if worker.join().is_err() {
        return Err(Error::Msg("engine thread panicked".into()));
    }
    info!("keyfocus stopped");
    Ok(())
}

/// Write default-source changes back to the settings file.
async fn persist_notices(mut notices: UnboundedReceiver<Notice>, config_path: PathBuf) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::DefaultChanged(pref) => {
                if let Err(e) = Settings::set_default_source(&config_path, pref.id()) {
                    warn!("{}", e.pretty());
                }
            }
            other => debug!(?other, "notice"),
        }
    }
}

/// Map process signals onto engine commands.
///
/// SIGUSR1 toggles the tracking mode, SIGUSR2 clears all mappings, SIGHUP
/// re-reads the default source from the settings file, and SIGINT/SIGTERM
/// shut the engine down.
async fn forward_signals(commands: UnboundedSender<Command>, config_path: PathBuf) {
    let (Ok(mut usr1), Ok(mut usr2), Ok(mut hup), Ok(mut term)) = (
        signal(SignalKind::user_defined1()),
        signal(SignalKind::user_defined2()),
        signal(SignalKind::hangup()),
        signal(SignalKind::terminate()),
    ) else {
        warn!("failed to install signal handlers; only ctrl-c will stop keyfocus");
        if signal::ctrl_c().await.is_ok() {
            commands.send(Command::Shutdown).ok();
        }
        return;
    };
    loop {
        let cmd = tokio::select! {
            _ = usr1.recv() => Command::ToggleMode,
            _ = usr2.recv() => Command::ClearMappings,
            _ = hup.recv() => match Settings::load_default_source(&config_path) {
                Ok(Some(id)) => Command::SetDefault(id),
                Ok(None) => {
                    debug!("no default source in settings; keeping current");
                    continue;
                }
                Err(e) => {
                    warn!("{}", e.pretty());
                    continue;
                }
            },
            _ = term.recv() => Command::Shutdown,
            _ = signal::ctrl_c() => Command::Shutdown,
        };
        let stop = cmd == Command::Shutdown;
        if commands.send(cmd).is_err() || stop {
            break;
        }
    }
}
