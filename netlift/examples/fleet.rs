//! Fleet example: upgrade several devices concurrently.
//!
//! Each device gets its own handle and its own run; the runs share one
//! `Upgrader`, one cancellation token (Ctrl-C stops every run at its next
//! phase boundary) and one `PairLocks` so two members of the same HA pair
//! are never upgraded at once.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example fleet -- --user admin --password secret \
//!     --image ./cat9k_iosxe.17.09.04a.SPA.bin sw1 sw2 sw3
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::future::join_all;
use netlift::{
    BootTarget, Device, DeviceBuilder, OutcomeKind, PairLocks, Platform, RebootPolicy,
    RemoteFile, TransferRequest, UpgradePolicy, Upgrader,
};

async fn upgrade_one(
    upgrader: &Upgrader,
    host: String,
    user: &str,
    password: &str,
    image: &PathBuf,
) -> Result<(String, OutcomeKind), netlift::Error> {
    let mut device = DeviceBuilder::new(&host)
        .username(user)
        .password(password)
        .platform(Platform::CiscoIos)
        .build()?;
    device.open(Duration::from_secs(30)).await?;

    let file_system = device.default_file_system().await?;
    let file_name = image
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image.bin")
        .to_string();
    let request = TransferRequest::new(image, RemoteFile::new(&file_system, &file_name));
    let target = BootTarget::new(file_name, &file_system);

    let outcome = upgrader.run(&mut device, &request, &target).await;
    println!("{}", outcome);
    device.close().await?;
    Ok((host, outcome.kind))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut user = "admin".to_string();
    let mut password = String::new();
    let mut image = None;
    let mut hosts = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--user" => user = args.next().unwrap_or(user),
            "--password" => password = args.next().unwrap_or_default(),
            "--image" => image = args.next().map(PathBuf::from),
            _ => hosts.push(arg),
        }
    }
    let image = image.ok_or("--image is required")?;

    let policy = UpgradePolicy::new(RebootPolicy::new(
        Duration::from_secs(1200),
        Duration::from_secs(30),
    ));
    let upgrader = Upgrader::new(policy).with_pair_locks(PairLocks::new());

    let token = upgrader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling at the next phase boundary...");
            token.cancel();
        }
    });

    let runs = hosts
        .into_iter()
        .map(|host| upgrade_one(&upgrader, host, &user, &password, &image));
    let results = join_all(runs).await;

    println!("\n=== Summary ===");
    let mut failed = 0;
    for result in results {
        match result {
            Ok((host, kind)) => {
                if kind != OutcomeKind::Completed {
                    failed += 1;
                }
                println!("{:<20} {}", host, kind);
            }
            Err(e) => {
                failed += 1;
                println!("error: {}", e);
            }
        }
    }

    if failed > 0 {
        std::process::exit(2);
    }
    Ok(())
}
