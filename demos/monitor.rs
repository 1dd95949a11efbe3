//! Connects to a Tesira DSP and prints state updates for a level and a mute
//! attribute of one control block.
//!
//! Usage: monitor <host> <instance-tag> [index]

use std::time::Duration;
use tesira_ttp::{AttributeKind, DeviceConfig, DeviceConnection, DeviceEvent, Subscription};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let mut args = std::env::args().skip(1);
    let host = args.next().ok_or("usage: monitor <host> <instance-tag> [index]")?;
    let tag = args.next().ok_or("usage: monitor <host> <instance-tag> [index]")?;
    let index: u32 = args.next().map(|s| s.parse()).transpose()?.unwrap_or(1);

    let mut config = DeviceConfig::new(host, 23);
    config.resubscribe_interval = Duration::from_secs(60);

    let connection = DeviceConnection::new(config);
    connection.open().await?;
    println!(
        "connected, serial {}",
        connection.serial_number().unwrap_or_default()
    );

    let level = Subscription::new(tag.clone(), AttributeKind::Level, index);
    let mute = Subscription::new(tag, AttributeKind::Mute, index);
    connection.subscribe_all([&level, &mute]).await?;

    let mut events = connection.events();
    loop {
        match events.recv().await? {
            DeviceEvent::State { id, value } => println!("{} = {}", id, value),
            DeviceEvent::Connection(state) => {
                println!("connection {}", state);
                break;
            }
        }
    }

    connection.close().await;
    Ok(())
}
