//! Example: Follow the now-playing metadata of a RadioKit channel
//!
//! Run with: cargo run -p pmoradiokit --example now_playing -- <access-token> <channel-id>
//! Optionally pass a YAML config file as third argument.

use pmoradiokit::{ListenerConfig, MetadataListener};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let (token, channel) = match (args.next(), args.next()) {
        (Some(token), Some(channel)) => (token, channel),
        _ => {
            eprintln!("usage: now_playing <access-token> <channel-id> [config.yaml]");
            std::process::exit(2);
        }
    };
    let config = match args.next() {
        Some(path) => ListenerConfig::load(path)?,
        None => ListenerConfig::default(),
    };

    let listener = MetadataListener::builder(token, channel.as_str())
        .config(config)
        .build()?;

    listener
        .on_update(|metadata| match metadata {
            Some(map) => {
                println!("Now playing:");
                for (key, value) in map {
                    println!("  {}: {}", key, value);
                }
            }
            None => println!("Metadata cleared"),
        })
        .on_position(|position, duration| {
            println!(
                "  {:>3}s / {}s",
                position / 1000,
                duration / 1000
            );
        });

    println!("Listening to {} (Ctrl-C to stop)...\n", listener.topic());
    listener.start().await?;

    tokio::signal::ctrl_c().await?;

    listener.stop().await?;
    println!("\nStopped");
    Ok(())
}
