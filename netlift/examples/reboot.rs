//! Reboot example: reload a device and follow it back.
//!
//! Shows the reboot coordinator on its own. The device is reloaded into
//! its configured boot target, polled until it answers again, and the
//! running image is checked.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example reboot -- --host 192.168.1.1 --user admin --password secret \
//!     --platform arista_eos --timeout 600 --poll 15
//! ```

use std::env;
use std::time::Duration;

use netlift::{Device, DeviceBuilder, Platform, RebootPolicy, ensure_active, reboot_and_wait};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let arg = |name: &str| {
        args.iter()
            .position(|a| a == name)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let host = arg("--host").unwrap_or_else(|| "localhost".to_string());
    let user = arg("--user").unwrap_or_else(|| "admin".to_string());
    let password = arg("--password").ok_or("--password is required")?;
    let platform: Platform = arg("--platform")
        .unwrap_or_else(|| "arista_eos".to_string())
        .parse()?;
    let timeout = arg("--timeout").and_then(|v| v.parse().ok()).unwrap_or(600);
    let poll = arg("--poll").and_then(|v| v.parse().ok()).unwrap_or(15);

    let mut device = DeviceBuilder::new(&host)
        .username(&user)
        .password(&password)
        .platform(platform)
        .build()?;

    println!("=== netlift reboot example ===\n");
    device.open(Duration::from_secs(30)).await?;

    let facts = device.refresh_facts().await?;
    println!(
        "{} ({}) running {}",
        facts.hostname.as_deref().unwrap_or(&host),
        facts.model.as_deref().unwrap_or("unknown model"),
        facts.os_version.as_deref().unwrap_or("unknown version"),
    );

    // Refuse to reload the standby half of a pair.
    let state = ensure_active(&mut device).await?;
    println!("Redundancy role: {}", state.role);

    let boot = device.boot_target().await;
    match &boot {
        Ok(target) => println!("Next boot: {}", target),
        Err(e) => println!("Boot target not readable: {}", e),
    }

    let policy = RebootPolicy::new(Duration::from_secs(timeout), Duration::from_secs(poll));
    println!("\nReloading (timeout {:?}, poll {:?})...", policy.timeout, policy.poll_interval);
    let report = reboot_and_wait(&mut device, &policy).await?;

    println!("\nResult: {} after {:?}", report.phase, report.elapsed);
    println!("Reconnect attempts: {}", report.attempts);
    let path: Vec<String> = report.transitions.iter().map(|p| p.to_string()).collect();
    println!("Transitions: {}", path.join(" -> "));
    if let Some(facts) = &report.facts {
        println!("Now running: {:?}", facts.os_version);
    }

    device.close().await?;
    Ok(())
}
