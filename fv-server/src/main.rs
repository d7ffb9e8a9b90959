use clap::{App, Arg};
use fv_server::{Server, ServerConfig};
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
    let matches = App::new("fv-server")
        .version("0.1.0")
        .about("Presence and voice-chat relay server")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML server config file"),
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
        Some(path) if Path::new(path).exists() => ServerConfig::load(path),
        _ => ServerConfig::default(),
    };

    slog::info!(log, "starting server"; "context" => "main", "address" => %config.address);

    let mut server = Server::new(config, log.clone()).expect("failed to bind server");
    if let Err(err) = server.run() {
        slog::error!(log, "server loop exited"; "context" => "main", "err" => %err);
    }
}
