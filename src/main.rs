use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use dotenv::dotenv;

use waf_log_archiver::archiver::{run, ProfileConnector};
use waf_log_archiver::credentials::{default_config_path, DEFAULT_PROFILE};
use waf_log_archiver::params::{usage, Settings};

#[derive(Parser)]
#[command(version, about = "Archives the previous day's WAF edge logs into object storage", long_about = None)]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase debug level (use -d for info, -dd for debug)")]
    debug: u8,

    /// credential profile to sign requests with
    #[arg(long, env = "OCI_CLI_PROFILE", default_value = DEFAULT_PROFILE)]
    profile: String,

    /// config file holding the profile, ~/.oci/config when unset
    #[arg(long, env = "OCI_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// archive into an object_store URL (file://, gs://, s3://) instead of the region's object storage
    #[arg(long)]
    archive_url: Option<String>,

    /// connect and request timeout in seconds. No timeout when unset
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// <region> <waf_policy_ocid> <compartment_ocid> <log_type> <webapp_domain> <bucket_name> <namespace>
    #[arg(allow_hyphen_values = true)]
    params: Vec<String>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.debug {
        0 => {}
        1 => env::set_var("RUST_LOG", "info"),
        2 => env::set_var("RUST_LOG", "debug"),
        _ => env::set_var("RUST_LOG", "trace"),
    }
    env_logger::init();

    let settings = Settings::default().with_timeout(cli.timeout_secs.map(Duration::from_secs));

    if cli.params.len() != settings.param_names.len() {
        eprintln!("{}", usage(&settings));
    }

    let connector = ProfileConnector {
        config_file: cli.config_file.unwrap_or_else(default_config_path),
        profile: cli.profile,
        archive_url: cli.archive_url,
        settings: settings.clone(),
    };

    let report = run(&cli.params, &settings, &connector, Utc::now()).await;
    println!("{}", report.to_json());
    std::process::exit(report.exit_code());
}
