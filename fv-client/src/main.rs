use clap::{App, Arg};
use fv_client::client::{self, NetworkClient};
use fv_client::ClientConfig;
use sloggers::{Config, LoggerConfig};
use std::path::Path;

fn build_logger(level: Option<&str>) -> slog::Logger {
    let severity = match level {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") => "warning",
        Some("error") => "error",
        _ => "info",
    };

    let toml = format!(
        "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stderr\"\n",
        severity
    );
    let config: LoggerConfig = serdeconv::from_toml_str(&toml).expect("invalid logger config");
    config.build_logger().expect("failed to build logger")
}

fn main() {
    let matches = App::new("fv-client")
        .version("0.1.0")
        .about("Native presence/voice-chat client, for manual and integration testing")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML client config file"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("trace, debug, info, warn, error"),
        )
        .get_matches();

    let log = build_logger(matches.value_of("log-level"));

    let config = match matches.value_of("config") {
        Some(path) if Path::new(path).exists() => ClientConfig::load(path),
        _ => ClientConfig::default(),
    };

    slog::info!(log, "starting client"; "context" => "main", "hosts" => ?config.hosts);

    let (poll, waker) = client::new_poll_and_waker().expect("failed to create network waker");
    let client_log = log.clone();
    let on_consistent = Box::new(move |(players, dirty): client::ConsistentView| {
        slog::info!(
            client_log, "consistent frame";
            "context" => "on_consistent",
            "players" => players.len(),
            "dirty" => dirty.any(),
        );
    });

    let (_handle, join) = NetworkClient::spawn(poll, waker, config, log.clone(), None, None, on_consistent);

    if join.join().is_err() {
        slog::error!(log, "network thread panicked"; "context" => "main");
    }
}
