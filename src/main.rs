use app::{
    bitcoin::RpcBitcoin,
    config::Config,
    database::{self, Database},
    lightning::LndLightning,
    listeners,
    orchestrator::Orchestrator,
    webhook::Dispatcher,
};
use rocket::{Build, Rocket};
use std::sync::Arc;

#[rocket::launch]
async fn rocket() -> _ {
    start_server().await
}

async fn start_server() -> Rocket<Build> {
    env_logger::init();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_owned());
    let config = Config::load(&config_path);

    let db: Database = database::connect(&config.database_url).await;
    database::run_migrations(&db).await;

    let lightning = Arc::new(
        LndLightning::connect(
            config.lightning.rest_endpoint.clone(),
            &config.lightning.macaroon_path,
            &config.lightning.cert_path,
        )
        .unwrap_or_else(|e| panic!("failed to connect to lightning node: {:?}", e)),
    );
    let bitcoin = Arc::new(RpcBitcoin::new(
        config.bitcoin.rpc_endpoint.clone(),
        config.bitcoin.rpc_user.clone(),
        config.bitcoin.rpc_password.clone(),
        config.bitcoin.zmq_raw_tx_endpoint.clone(),
        config.bitcoin.zmq_raw_block_endpoint.clone(),
    ));

    let webhook = Dispatcher::start(reqwest::Client::new(), config.limits.webhook_retry_base());

    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        lightning.clone(),
        bitcoin.clone(),
        webhook.clone(),
        app::btc::Sats(config.limits.max_amount_sat_per_invoice),
        config.limits.max_memo_len,
    ));

    spawn_listeners(&config, db.clone(), lightning, bitcoin, webhook);

    let rate_limit = api::RateLimit::new(config.rate_limit.limit, config.rate_limit.span());
    api::register(Rocket::build(), db, orchestrator, rate_limit)
}

/// Spawns the three push-driven listeners and lets them run for the life of the process. None of
/// them is expected to ever return: a genuine panic inside one (a hold-invoice receipt, an
/// output-value mismatch between what was recorded and what confirmed) or the underlying stream
/// simply closing are both fatal conditions. A single watchdog task awaits all three `JoinHandle`s
/// together and calls `std::process::exit` the moment any of them resolves, so the failure can't
/// get lost inside a detached task's own unwind boundary the way a bare `tokio::spawn(async move
/// { handle.await.unwrap() })` would lose it.
fn spawn_listeners(
    config: &Config,
    db: Database,
    lightning: Arc<LndLightning>,
    bitcoin: Arc<RpcBitcoin>,
    webhook: Dispatcher,
) {
    use app::{bitcoin::Bitcoin, lightning::Lightning};

    let invoice_updates = lightning.subscribe_invoice_updates();
    let invoice_db = db.clone();
    let invoice_webhook = webhook.clone();
    let invoice_handle =
        tokio::spawn(listeners::invoice::run(invoice_db, invoice_webhook, invoice_updates));

    let raw_txs = bitcoin.subscribe_raw_transactions();
    let onchain_db = db.clone();
    let onchain_webhook = webhook.clone();
    let onchain_handle =
        tokio::spawn(listeners::onchain_tx::run(onchain_db, onchain_webhook, raw_txs));

    let raw_blocks = bitcoin.subscribe_raw_blocks();
    let block_db = db;
    let block_bitcoin: Arc<dyn Bitcoin> = bitcoin;
    let block_webhook = webhook;
    let confirmation_threshold = config.confirmation_threshold;
    let block_handle = tokio::spawn(listeners::block::run(
        block_db,
        block_bitcoin,
        block_webhook,
        confirmation_threshold,
        raw_blocks,
    ));

    tokio::spawn(async move {
        let result = tokio::try_join!(invoice_handle, onchain_handle, block_handle);
        match result {
            Ok(_) => log::error!("a listener task returned, which should never happen"),
            Err(e) => log::error!("a listener task panicked: {:?}", e),
        }
        std::process::exit(1);
    });
}
