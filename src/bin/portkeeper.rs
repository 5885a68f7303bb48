use anyhow::{Context, Result};
use clap::Parser;
use portkeeper::{init_logging, open_port, shutdown_signal, MapperState, Protocol};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keep a port forwarded on the local UPnP gateway", long_about = None)]
struct Args {
    /// Port to forward (same external and internal port)
    #[arg(short, long)]
    port: u16,

    /// Transport protocol (tcp or udp)
    #[arg(long, default_value = "tcp")]
    protocol: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let protocol: Protocol = args.protocol.parse()?;

    println!("portkeeper v{}", portkeeper::VERSION);
    println!("Forwarding: {} port {}", protocol, args.port);
    println!("Press Ctrl-C (or send SIGTERM) to remove the mapping and exit\n");

    let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
    tokio::pin!(shutdown);

    let mapper = open_port(protocol, args.port)?;
    let mut state = mapper.subscribe();

    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    MapperState::Active => {
                        if let Some(active) = mapper.active_mapping() {
                            let external = active
                                .external_ip
                                .map(|ip| ip.to_string())
                                .unwrap_or_else(|| "unknown".to_string());
                            println!(
                                "Mapped via {} (external IP: {}, lease until {})",
                                active.endpoint.control_url, external, active.expires_at_utc
                            );
                        }
                    }
                    MapperState::Idle => println!("No gateway accepted the mapping, retrying later"),
                    _ => {}
                }
            }
            _ = &mut shutdown => break,
        }
    }

    println!("\nRemoving port mapping...");
    let outcome = mapper.shutdown().await;
    println!("Done: {:?}", outcome);

    Ok(())
}
