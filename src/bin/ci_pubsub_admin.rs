use std::error::Error;

use ci_pubsub::config::Settings;
use ci_pubsub::service::PubSubService;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ci-pubsub-admin", version, about = "Pub/Sub engine admin tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publishes a single event to a channel and exits.
    Publish {
        channel: String,
        /// JSON payload, e.g. '{"op":"created","id":"n1"}'.
        data: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Subscribes and prints envelopes as they arrive until interrupted.
    Tail {
        channel: String,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        promiscuous: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Prints the current backlog for a channel without subscribing.
    Stats {
        channel: String,
        #[arg(long, default_value = "admin")]
        user: String,
        #[arg(long)]
        promiscuous: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let service = PubSubService::new(Settings::from_env());

    match cli.command {
        Commands::Publish { channel, data, owner } => cmd_publish(&service, &channel, &data, owner).await?,
        Commands::Tail { channel, user, promiscuous, limit } => cmd_tail(&service, &channel, &user, promiscuous, limit).await?,
        Commands::Stats { channel, user, promiscuous } => cmd_stats(&service, &channel, &user, promiscuous).await?,
    }
    Ok(())
}

async fn cmd_publish(service: &PubSubService, channel: &str, data: &str, owner: Option<String>) -> Result<(), Box<dyn Error>> {
    let value: serde_json::Value = serde_json::from_str(data)?;
    let sequence_id = service.publish(channel, value, owner).await?;
    println!("published sequence_id={sequence_id}");
    Ok(())
}

async fn cmd_tail(
    service: &PubSubService,
    channel: &str,
    user: &str,
    promiscuous: bool,
    limit: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let subscription_id = service.subscribe(channel, user, promiscuous, None).await?;
    let mut session = service.listen(subscription_id, user).await?;
    let mut seen = 0usize;
    loop {
        let envelope = session.next().await?;
        println!("{}", serde_json::to_string(&envelope)?);
        seen += 1;
        if limit.map_or(false, |limit| seen >= limit) {
            break;
        }
    }
    service.unsubscribe(subscription_id, user)?;
    Ok(())
}

async fn cmd_stats(service: &PubSubService, channel: &str, user: &str, promiscuous: bool) -> Result<(), Box<dyn Error>> {
    let events = service.query_events(channel, 0, user, promiscuous, None).await?;
    match (events.first(), events.last()) {
        (Some(first), Some(last)) => {
            println!(
                "channel={channel} count={} earliest_sequence_id={} latest_sequence_id={}",
                events.len(),
                first.sequence_id,
                last.sequence_id
            );
        }
        _ => println!("channel={channel} count=0"),
    }
    Ok(())
}
