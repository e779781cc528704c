//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmt, LoggingFmtStyle};
use holo_lisp::instance::{
    Instance, InstanceChannelsTx, InstanceNet, protocol_input_channels,
};
use nix::unistd::{Group, Uid, User};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

fn fmt_layer<S, W>(
    fmt: &LoggingFmt,
    writer: W,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_thread_ids(fmt.thread_ids)
        .with_file(fmt.source_location)
        .with_line_number(fmt.source_location)
        .with_ansi(fmt.colors);
    match fmt.style {
        LoggingFmtStyle::Compact => layer.compact().boxed(),
        LoggingFmtStyle::Full => layer.boxed(),
        LoggingFmtStyle::Json => layer.json().boxed(),
        LoggingFmtStyle::Pretty => layer.pretty().boxed(),
    }
}

fn init_tracing(config: &config::Logging) {
    // Enable logging to journald.
    let journald = config.journald.then(|| {
        tracing_journald::layer().expect("couldn't connect to journald")
    });

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let (dir, name) = config.file.dir_and_name();
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => rolling::never(dir, name),
            LoggingFileRotation::Hourly => rolling::hourly(dir, name),
            LoggingFileRotation::Daily => rolling::daily(dir, name),
        };
        fmt_layer(&config.file.fmt, file_appender)
    });

    // Enable logging to stdout.
    let stdout = config
        .stdout
        .enabled
        .then(|| fmt_layer(&config.stdout.fmt, std::io::stdout));

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(journald)
        .with(file)
        .with(stdout)
        .init();
}

fn privdrop(user: &str, group: &str) -> nix::Result<()> {
    let Some(user) = User::from_name(user)? else {
        error!(name = %user, "failed to find user");
        std::process::exit(1);
    };
    let gid = match Group::from_name(group)? {
        Some(group) => group.gid,
        None => user.gid,
    };

    // Drop to unprivileged user and group.
    nix::unistd::setgroups(&[gid])?;
    nix::unistd::setresgid(gid, gid, gid)?;
    nix::unistd::setresuid(user.uid, user.uid, user.uid)?;

    Ok(())
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).unwrap();
        let mut sigterm = signal(SignalKind::terminate()).unwrap();

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

fn build_version() -> String {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    match rustc_tools_util::get_version_info!().commit_hash {
        Some(hash) => format!("{VERSION} ({hash})"),
        None => VERSION.to_owned(),
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("LISP mapping node daemon")
        .version(build_version().as_str())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("topology")
                .short("t")
                .long("topology")
                .value_name("file")
                .help("Specify an alternative topology file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = Config::load(config_file);

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Read topology file.
    let topology_file =
        matches.value_of("topology").unwrap_or(&config.topology_path);
    let topology = match holo_lisp::config::Config::load(topology_file) {
        Ok(topology) => topology,
        Err(error) => {
            error!(path = %topology_file, %error, "failed to load topology");
            std::process::exit(1);
        }
    };

    // Drop privileges.
    if let Err(error) = privdrop(&config.user, &config.group) {
        error!(%error, "failed to drop root privileges");
        std::process::exit(1);
    }

    // We're ready to go!
    info!("starting up");

    // Main loop.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            // Spawn signal listener.
            let signal_rx = signal_listener();

            // Open the LISP control sockets.
            let (protocol_input, protocol_input_rx) =
                protocol_input_channels();
            let (udp_txp, udp_txc) = mpsc::unbounded_channel();
            let net = match InstanceNet::new(
                &config.listen,
                &protocol_input.udp_rx,
                udp_txc,
            ) {
                Ok(net) => net,
                Err(error) => {
                    error!(%error, "failed to open sockets");
                    std::process::exit(1);
                }
            };

            // Run the instance until a stop signal is received.
            let tx = InstanceChannelsTx {
                protocol_input,
                udp_tx: udp_txp,
            };
            let instance =
                match Instance::new(topology, net.sockets.clone(), tx) {
                    Ok(instance) => instance,
                    Err(error) => {
                        error!(%error, "failed to build address trees");
                        std::process::exit(1);
                    }
                };
            instance.run(protocol_input_rx, signal_rx).await;
        });

    info!("exiting");
}
