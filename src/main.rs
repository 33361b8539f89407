use clap::Parser;
use pp_processor::args::Args;
use pp_processor::calculator::{remote::RemoteEngine, CalculatorRegistry, Engine};
use pp_processor::database::db::DbClient;
use pp_processor::database::Store;
use pp_processor::messaging::{config::RabbitMqConfig, events::NotificationSink, publisher::RabbitMqPublisher};
use pp_processor::model::structures::gamemode::Gamemode;
use pp_processor::processor::Processor;
use pp_processor::reporting::LogReporter;
use pp_processor::worker::{WorkUnit, WorkerPool};
use std::sync::Arc;
use tracing::info;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    let gamemode = Gamemode::try_from(args.gamemode).expect("Expected a gamemode between 0 and 3");

    let store = Arc::new(
        DbClient::connect(&args.connection_string)
            .await
            .expect("Expected valid database connection")
    );

    let engine = RemoteEngine::connect(&args.calculator_url)
        .await
        .expect("Expected a reachable calculator engine");
    let registry = Arc::new(CalculatorRegistry::new(Engine::Remote(engine)));

    let sink = if args.notifications {
        let config = RabbitMqConfig::from_env().expect("Expected RabbitMQ credentials in the environment");
        let publisher = RabbitMqPublisher::connect_from_config(&config)
            .await
            .expect("Expected a reachable RabbitMQ broker");
        NotificationSink::RabbitMq(publisher)
    } else {
        NotificationSink::Disabled
    };

    let processor = Arc::new(Processor::new(
        Arc::clone(&store),
        registry,
        Arc::new(LogReporter),
        Arc::new(sink)
    ));

    let user_ids = store.get_user_ids(gamemode).await.expect("Expected user id query to succeed");
    info!("Dispatching updates for {} users", user_ids.len());

    let pool = WorkerPool::spawn(Arc::clone(&processor), args.workers);
    for user_id in user_ids {
        pool.submit(WorkUnit::UserUpdate { user_id, gamemode }).await;
    }
    pool.shutdown().await;

    info!("Processing complete");
}
