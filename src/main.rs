// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{channel::Event, EventLoop, InsertError};
use clap_lex::RawArgs;
use std::{path::PathBuf, process};
use tracing::{debug, error, info, warn};

use crate::{
    brightness::BrightnessController,
    config::PersistenceStore,
    state::{Signal, State},
};

pub mod backend;
pub mod brightness;
pub mod config;
pub mod dbus;
mod logger;
pub mod output;
pub mod state;
#[cfg(feature = "systemd")]
pub mod systemd;
pub mod utils;

#[derive(Debug, Default)]
struct Args {
    outputs: Option<PathBuf>,
    state_dir: Option<PathBuf>,
}

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occured in main(): {:?}", err);
        process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    let raw_args = RawArgs::from_args();
    let mut cursor = raw_args.cursor();
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let mut args = Args::default();

    // Parse the arguments
    while let Some(arg) = raw_args.next_os(&mut cursor) {
        match arg.to_str() {
            Some("--help") | Some("-h") => {
                print_help(env!("CARGO_PKG_VERSION"), git_hash);
                return Ok(());
            }
            Some("--version") | Some("-V") => {
                println!(
                    "cosmic-display {} (git commit {})",
                    env!("CARGO_PKG_VERSION"),
                    git_hash
                );
                return Ok(());
            }
            Some("--outputs") => {
                let value = raw_args
                    .next_os(&mut cursor)
                    .context("--outputs requires a file")?;
                args.outputs = Some(PathBuf::from(value));
            }
            Some("--state-dir") => {
                let value = raw_args
                    .next_os(&mut cursor)
                    .context("--state-dir requires a directory")?;
                args.state_dir = Some(PathBuf::from(value));
            }
            _ => {
                eprintln!("Unknown argument {:?}", arg);
                print_help(env!("CARGO_PKG_VERSION"), git_hash);
                process::exit(2);
            }
        }
    }

    // setup logger
    logger::init_logger()?;
    info!("Cosmic display starting up!");

    // init event loop
    let mut event_loop: EventLoop<'static, State> =
        EventLoop::try_new().with_context(|| "Failed to initialize event loop")?;
    let loop_signal = event_loop.get_signal();

    // wakes the loop when background work finished
    let (ping, ping_source) = calloop::ping::make_ping().context("Failed to create ping")?;
    event_loop
        .handle()
        .insert_source(ping_source, |_, _, _| {})
        .map_err(|InsertError { error, .. }| error)
        .with_context(|| "Failed to add ping to event_loop")?;

    let settings = config::init_settings(&event_loop.handle());
    let store = PersistenceStore::new(config::state_dir(args.state_dir)?);
    info!(path = %store.root().display(), "Output records");

    let mut backend = backend::init_backend(args.outputs.as_deref())?;
    let (tx, rx) = calloop::channel::channel();
    backend.watch(tx);
    event_loop
        .handle()
        .insert_source(rx, |event, _, state| match event {
            Event::Msg(event) => state.router.push(event),
            Event::Closed => {
                warn!("Display backend stopped sending events");
                state.should_stop = true;
            }
        })
        .map_err(|InsertError { error, .. }| error)
        .with_context(|| "Failed to add channel to event_loop")?;

    let mut state = State::new(
        backend,
        store,
        settings,
        BrightnessController::detect(),
        Some(ping),
    );
    report(&mut state);

    #[cfg(feature = "systemd")]
    systemd::ready();

    // run the event loop
    event_loop.run(None, &mut state, |state| {
        // shall we shut down?
        if state.should_stop {
            info!("Shutting down");
            loop_signal.stop();
            loop_signal.wakeup();
            return;
        }

        state.refresh();
        report(state);
    })?;

    // drop eventloop & state before logger
    std::mem::drop(event_loop);
    std::mem::drop(state);

    Ok(())
}

fn report(state: &mut State) {
    for signal in state.take_signals() {
        match signal {
            Signal::Warning(msg) => warn!("{}", msg),
            Signal::ConfigChanged(snapshot) => info!(
                outputs = snapshot.outputs.len(),
                enabled = snapshot.enabled().count(),
                primary = ?snapshot.primary().map(|o| o.name()),
                internal = ?snapshot.internal().map(|o| o.name()),
                unify = snapshot.unify_outputs,
                "Effective output configuration"
            ),
            signal => debug!(?signal),
        }
    }
}

fn print_help(version: &str, git_rev: &str) {
    println!(
        r#"cosmic-display {version} (git commit {git_rev})
System76 <info@system76.com>

Keeps the output configuration of the COSMIC desktop in sync with the
connected monitors.

Project home page: https://github.com/pop-os/cosmic-comp

Options:
  -h, --help              Show this message
  -V, --version           Show the version of cosmic-display
      --outputs <FILE>    Use a headless backend with the outputs in FILE
      --state-dir <DIR>   Keep output records in DIR"#
    );
}
