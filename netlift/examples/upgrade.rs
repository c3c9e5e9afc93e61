//! Upgrade example: push an image, boot it, and report the outcome.
//!
//! Runs the whole upgrade against one device: image transfer with
//! checksum verification, boot target (or install mode), reload, reconnect
//! and version validation. The outcome is printed as JSON.
//!
//! # Prerequisites
//!
//! - A device of one of the supported platforms
//! - Credentials allowed to copy files and reload
//! - SCP enabled on the device (`ip scp server enable` on IOS)
//!
//! # Usage
//!
//! ```bash
//! cargo run --example upgrade -- --host 10.0.0.1 --user admin --password secret \
//!     --platform cisco_ios --image ./c2960x-universalk9-mz.152-7.E9.bin
//! ```
//!
//! Wireless controllers fetch their own images:
//! ```bash
//! cargo run --example upgrade -- --host wlc1 --user admin --password secret \
//!     --platform cisco_aireos --preloaded AIR-CT5520-K9-8-10-185-0.aes --peer-timeout 600
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use netlift::{
    BootTarget, Device, DeviceBuilder, PeerPolicy, Platform, RebootPolicy, RemoteFile,
    TransferRequest, UpgradePolicy, Upgrader,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let platform: Platform = args.platform.parse()?;

    let mut builder = DeviceBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .platform(platform);

    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key_path) = &args.key {
        builder = builder.private_key(key_path);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    let mut device = builder.build()?;
    println!("Connecting to {}:{}...", args.host, args.port);
    device.open(Duration::from_secs(30)).await?;

    let file_system = match &args.file_system {
        Some(fs) => fs.clone(),
        None => device.default_file_system().await?,
    };

    let mut policy = UpgradePolicy::new(RebootPolicy::new(
        Duration::from_secs(args.reboot_timeout),
        Duration::from_secs(args.poll_interval),
    ));
    if let Some(secs) = args.peer_timeout {
        policy = policy.with_peer(PeerPolicy::new(
            Duration::from_secs(secs),
            Duration::from_secs(args.poll_interval),
        ));
    }
    let upgrader = Upgrader::new(policy);

    let outcome = match (&args.image, &args.preloaded) {
        (Some(image), _) => {
            let file_name = image
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or("image path has no file name")?
                .to_string();
            let request = TransferRequest::new(image, RemoteFile::new(&file_system, &file_name));
            let target = BootTarget::new(file_name, &file_system);
            upgrader.run(&mut device, &request, &target).await
        }
        (None, Some(name)) => {
            let target = BootTarget::new(name, &file_system);
            upgrader.run_preloaded(&mut device, &target).await
        }
        (None, None) => {
            eprintln!("Error: Must provide either --image or --preloaded");
            std::process::exit(1);
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    device.close().await?;

    if !outcome.is_success() {
        std::process::exit(2);
    }
    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
    platform: String,
    image: Option<PathBuf>,
    preloaded: Option<String>,
    file_system: Option<String>,
    reboot_timeout: u64,
    poll_interval: u64,
    peer_timeout: Option<u64>,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut parsed = Self {
            host: "localhost".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "admin".to_string()),
            password: None,
            key: None,
            platform: "cisco_ios".to_string(),
            image: None,
            preloaded: None,
            file_system: None,
            reboot_timeout: 900,
            poll_interval: 20,
            peer_timeout: None,
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).cloned();
            match (args[i].as_str(), value) {
                ("--host" | "-h", Some(v)) => parsed.host = v,
                ("--port" | "-p", Some(v)) => parsed.port = v.parse().unwrap_or(22),
                ("--user" | "-u", Some(v)) => parsed.user = v,
                ("--password" | "-P", Some(v)) => parsed.password = Some(v),
                ("--key" | "-k", Some(v)) => parsed.key = Some(PathBuf::from(v)),
                ("--platform", Some(v)) => parsed.platform = v,
                ("--image", Some(v)) => parsed.image = Some(PathBuf::from(v)),
                ("--preloaded", Some(v)) => parsed.preloaded = Some(v),
                ("--file-system", Some(v)) => parsed.file_system = Some(v),
                ("--reboot-timeout", Some(v)) => parsed.reboot_timeout = v.parse().unwrap_or(900),
                ("--poll-interval", Some(v)) => parsed.poll_interval = v.parse().unwrap_or(20),
                ("--peer-timeout", Some(v)) => parsed.peer_timeout = v.parse().ok(),
                ("--help", _) => {
                    Self::print_help();
                    std::process::exit(0);
                }
                (other, _) => {
                    eprintln!("Unknown or incomplete argument: {}", other);
                    i += 1;
                    continue;
                }
            }
            i += 2;
        }
        parsed
    }

    fn print_help() {
        println!(
            r#"netlift upgrade example

USAGE:
    cargo run --example upgrade -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>            Target host [default: localhost]
    -p, --port <PORT>            SSH port [default: 22]
    -u, --user <USER>            Username [default: $USER]
    -P, --password <PASS>        Password for authentication
    -k, --key <PATH>             Path to SSH private key
    --platform <NAME>            cisco_ios, cisco_nxos, arista_eos, juniper_junos, cisco_aireos
                                 [default: cisco_ios]
    --image <PATH>               Local image to push and boot
    --preloaded <NAME>           Boot an image already on the device instead
    --file-system <FS>           Destination file system [default: device default]
    --reboot-timeout <SECS>      Reboot wait budget [default: 900]
    --poll-interval <SECS>       Reconnect poll interval [default: 20]
    --peer-timeout <SECS>        Wait this long for the HA peer afterwards
    --help                       Print this help message
"#
        );
    }
}
