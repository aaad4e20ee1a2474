use std::{future::Future, io, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use fraudstream::{
    admin,
    codec::get_decoder,
    generator::Generator,
    publisher::{self, KafkaPublisher},
    scheduler::Scheduler,
    settings::{LogFormat, Settings},
    sink::postgres::PgStore,
    subscriber::{kafka::KafkaSource, Subscriber},
};
use tokio::{signal, sync::watch, task::JoinSet};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[doc(hidden)]
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and publish a transaction every interval
    Produce,
    /// Consume transactions and persist them
    Consume,
    /// Serve the admin HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = Settings::new(&args.config).context("cannot load config")?;
    init_tracing(settings.log.format);

    match args.command {
        Command::Produce => produce(settings).await,
        Command::Consume => consume(settings).await,
        Command::Serve => serve(settings).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolves once Ctrl-C is received; every clone of the receiver sees it
fn shutdown_signal() -> watch::Receiver<bool> {
    shutdown_on(signal::ctrl_c())
}

fn shutdown_on<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal.await {
            error!(error = %e, "listening for shutdown signal");
            // keep the sender so receivers never see a shutdown
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    // sender gone means no signal can arrive any more
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn produce(settings: Settings) -> anyhow::Result<()> {
    if settings.kafka.create_topic {
        publisher::ensure_topic(&settings.kafka).await?;
    }
    let cfg = &settings.producer;
    let generator = Generator::from_seed(
        cfg.seed,
        cfg.timezone()?,
        &cfg.location,
        &cfg.merchant_category,
    );
    let publisher = KafkaPublisher::new(&settings.kafka)?;
    let scheduler = Scheduler::new(generator, publisher, cfg.interval());

    scheduler.run(wait_for(shutdown_signal())).await;
    scheduler.publisher().flush();
    Ok(())
}

async fn consume(settings: Settings) -> anyhow::Result<()> {
    let store = PgStore::connect(&settings.database).await?;
    let shutdown = shutdown_signal();
    let mut members = JoinSet::new();
    for member in 0..settings.consumer.workers {
        let source = KafkaSource::new(&settings.kafka, &settings.consumer)
            .with_context(|| format!("creating group member {member}"))?;
        let decoder = get_decoder(&settings.consumer.decoder)?;
        let subscriber = Subscriber::new(
            source,
            decoder,
            store.clone(),
            settings.consumer.retry_backoff(),
        );
        let stop = wait_for(shutdown.clone());
        members.spawn(async move { subscriber.run(stop).await });
    }
    while let Some(result) = members.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "group member crashed");
        }
    }
    Ok(())
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let store = PgStore::connect(&settings.database).await?;
    admin::serve(settings.http.listen, Arc::new(store), wait_for(shutdown_signal())).await
}
