use clap::{Arg, Command};
use std::process;
use tracing_subscriber::EnvFilter;

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("dialspeed-cli")
        .version("1.0")
        .about("Manages the dial speed partition cache and analytics API")
        .subcommand(
            Command::new("serve")
                .about("Run the dial speed API server")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("import")
                .about("Ingest dialer CSV exports and push them upstream")
                .arg(config_arg())
                .arg(
                    Arg::new("files")
                        .value_name("FILE")
                        .num_args(1..)
                        .required(true)
                        .help("CSV export files to ingest"),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("serve", serve_matches)) => {
            let config_path = serve_matches
                .get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/dialspeed.toml");

            if let Err(e) = dialspeed::run_dialspeed_server(config_path).await {
                eprintln!("Server error: {}", e);
                process::exit(1);
            }
        }
        Some(("import", import_matches)) => {
            let config_path = import_matches
                .get_one::<String>("config")
                .map(|s| s.as_str())
                .unwrap_or("config/dialspeed.toml");
            let files: Vec<String> = import_matches
                .get_many::<String>("files")
                .map(|v| v.cloned().collect())
                .unwrap_or_default();

            if let Err(e) = dialspeed::run_import(config_path, &files).await {
                eprintln!("Import error: {}", e);
                process::exit(1);
            }
        }
        _ => {
            println!("No subcommand specified. Use --help for usage information.");
            process::exit(1);
        }
    }
}
