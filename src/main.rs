use realms_state_sync::cache::QueryCache;
use realms_state_sync::chain::ChainReader;
use realms_state_sync::config::ServiceConfig;
use realms_state_sync::query::{Principal, QueryFacade};
use realms_state_sync::reconcile::{InMemoryStore, OffChainStore, ReconciliationEngine};
use realms_state_sync::rpc::SolanaRpcClient;
use realms_state_sync::sync::{
	CacheInvalidationHandler, EventDispatcher, LoggingHandler, ProgramWatcher, WatcherConfig,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: realms-state-sync realm <address> | proposals <realm> | treasury <governance> | query <field> [json-args] | watch";

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,realms_state_sync=debug")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let mut args = std::env::args().skip(1);
	let Some(command) = args.next() else {
		error!("{}", USAGE);
		return;
	};

	let config = match ServiceConfig::from_env() {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	let client = match SolanaRpcClient::new(
		config.rpc_url.clone(),
		config.rpc_ws_url.clone(),
		config.rpc_timeout,
	) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create RPC client: {}", e);
			return;
		}
	};
	info!("Using node {}", config.rpc_url);

	let store: Arc<dyn OffChainStore> = match &config.store_path {
		Some(path) => match InMemoryStore::load(path).await {
			Ok(store) => Arc::new(store),
			Err(e) => {
				error!("Failed to load off-chain records: {}", e);
				return;
			}
		},
		None => Arc::new(InMemoryStore::new()),
	};

	let cache = Arc::new(QueryCache::new(config.cache.clone()));
	let reader = ChainReader::new(client.clone(), config.reader.clone());
	let engine = Arc::new(ReconciliationEngine::new(
		reader,
		store,
		cache.clone(),
		config.engine_config(),
	));

	let watcher = ProgramWatcher::new(client, config.governance_program, WatcherConfig::default());
	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_handler(Box::new(LoggingHandler));
	dispatcher.register_handler(Box::new(CacheInvalidationHandler::new(cache)));

	let (stop, shutdown) = watch::channel(false);
	let watcher_task = tokio::spawn(async move { watcher.run(&mut dispatcher, shutdown).await });

	if command == "watch" {
		if let Err(e) = tokio::signal::ctrl_c().await {
			error!("Failed to listen for shutdown signal: {}", e);
		}
		info!("Shutting down");
	} else {
		let facade = QueryFacade::new(engine, Some(config.request_deadline));
		match query_from_args(&command, args.collect()) {
			Ok((field, field_args)) => run_query(&facade, field, field_args).await,
			Err(reason) => error!("{}\n{}", reason, USAGE),
		}
	}

	let _ = stop.send(true);
	match watcher_task.await {
		Ok(Ok(())) => {}
		Ok(Err(e)) => error!("Watcher stopped with error: {}", e),
		Err(e) => error!("Watcher task failed: {}", e),
	}
}

/// Map a command line onto a façade field and its JSON arguments.
fn query_from_args(command: &str, rest: Vec<String>) -> Result<(&'static str, Value), String> {
	let address = |key: &str| -> Result<Value, String> {
		match rest.first() {
			Some(address) => Ok(json!({ key: address })),
			None => Err(format!("{} needs an address", command)),
		}
	};

	match command {
		"realm" => Ok(("realm", address("address")?)),
		"proposals" => Ok(("proposals", address("realm")?)),
		"treasury" => Ok(("treasury", address("governance")?)),
		"query" => {
			let field = rest.first().ok_or("query needs a field name")?;
			let field = QueryFacade::fields()
				.find(|known| *known == field.as_str())
				.ok_or_else(|| format!("unknown field {}", field))?;
			let field_args = match rest.get(1) {
				Some(raw) => serde_json::from_str(raw)
					.map_err(|e| format!("arguments are not valid JSON: {}", e))?,
				None => json!({}),
			};
			Ok((field, field_args))
		}
		other => Err(format!("unknown command {}", other)),
	}
}

async fn run_query(facade: &QueryFacade, field: &str, args: Value) {
	match facade.resolve(field, args, &Principal::anonymous()).await {
		Ok(value) => match serde_json::to_string_pretty(&value) {
			Ok(json) => println!("{}", json),
			Err(e) => error!("Failed to render result: {}", e),
		},
		Err(e) => error!("Query {} failed: {}", field, e),
	}
}
