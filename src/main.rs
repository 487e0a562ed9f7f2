use std::io::Result;
use std::net::IpAddr;
use std::process::exit;

use clap::{Arg, Command};
use env_logger::Builder;
use log::{debug, error, info, LevelFilter};

use sbgpd::{config, serve};

fn main() {
    let matches = Command::new("sbgpd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scriptable BGP speaker")
        .arg(
            Arg::new("configpath")
                .short('c')
                .long("config-path")
                .help("Path to the sbgpd server config")
                .takes_value(true)
                .index(1)
                .required(true),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .help("IP Address to listen on")
                .takes_value(true),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .takes_value(true)
                .help("TCP port to listen on"),
        )
        .arg(
            Arg::new("validate")
                .long("validate")
                .help("Parse the configuration and exit"),
        )
        .arg(
            Arg::new("v")
                .short('v')
                .multiple_occurrences(true)
                .help("Sets the level of logging verbosity"),
        )
        .get_matches();

    let config_path: String = matches
        .value_of("configpath")
        .expect("config path is required")
        .to_string();

    let addr: IpAddr = match matches.value_of("address").unwrap_or("0.0.0.0").parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("Invalid listen address: {}", err);
            exit(1);
        }
    };
    let port: u16 = match matches.value_of("port").unwrap_or("179").parse() {
        Ok(port) => port,
        Err(err) => {
            eprintln!("Invalid port: {}", err);
            exit(1);
        }
    };

    let (sbgpd_level, other_level) = match matches.occurrences_of("v") {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("sbgpd"), sbgpd_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", sbgpd_level, other_level);

    exit(match run(&config_path, addr, port, matches.is_present("validate")) {
        Ok(()) => 0,
        Err(err) => {
            error!("{}", err);
            1
        }
    });
}

fn run(config_path: &str, addr: IpAddr, port: u16, validate: bool) -> Result<()> {
    let server_config = config::from_file(config_path)?;
    debug!(
        "Found {} peers in {}",
        server_config.peers.len(),
        config_path
    );
    if validate {
        for peer in &server_config.peers {
            info!("neighbor {} remote-as {}", peer.remote_ip, peer.remote_as);
        }
        return Ok(());
    }

    // One OS thread; peers, helpers and the API share it cooperatively
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(
        addr,
        port,
        server_config,
        Some(config_path.to_string()),
    ))
}
