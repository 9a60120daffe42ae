//!
//! JSON-RPC client for the chain node.
//!
//! This module provides an async client for the node's account API over HTTP
//! (`getMultipleAccounts`, `getProgramAccounts`, `getAccountInfo`) and a websocket
//! program subscription used to learn about account changes. All methods are async
//! and designed for use with Tokio.

use super::types::*;
use super::{AccountStream, RpcTransport};
use crate::governance::Address;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const COMMITMENT: &str = "confirmed";

/// Chain node JSON-RPC client
pub struct SolanaRpcClient {
	/// The underlying HTTP client for JSON-RPC requests.
	http_client: Client,
	/// The HTTP JSON-RPC endpoint.
	rpc_url: String,
	/// The WebSocket endpoint for subscriptions.
	ws_url: String,
	/// Monotonic JSON-RPC request id.
	next_id: AtomicU64,
}

impl SolanaRpcClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC requests.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	/// * `timeout` - Per-request HTTP timeout.
	pub fn new(rpc_url: String, ws_url: String, timeout: Duration) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			next_id: AtomicU64::new(1),
		})
	}

	/// Subscribe to changes of accounts owned by `program`.
	///
	/// # Returns
	/// A pinned async stream of account notifications. Each item is either a
	/// notification or an error.
	///
	/// # Errors
	/// Returns `RpcError` if the WebSocket connection or subscription fails.
	pub async fn subscribe_program(
		&self,
		program: &Address,
		filters: &[AccountFilter],
	) -> Result<AccountStream, RpcError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "programSubscribe",
			"params": [
				program.to_string(),
				{
					"encoding": "base64",
					"commitment": COMMITMENT,
					"filters": filters.iter().map(AccountFilter::to_json).collect::<Vec<_>>()
				}
			]
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscription id
		match ws_receiver.next().await {
			Some(msg) => match msg? {
				Message::Text(text) => {
					let parsed: Value = serde_json::from_str(&text)?;
					if let Some(error) = parsed.get("error") {
						return Err(rpc_error(error));
					}
					let subscription = parsed.get("result").and_then(Value::as_u64).ok_or_else(|| {
						RpcError::SubscriptionError("Subscription not acknowledged".to_string())
					})?;
					info!(
						"Subscribed to program {} (subscription {})",
						program, subscription
					);
				}
				_ => {
					return Err(RpcError::SubscriptionError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			},
			None => {
				return Err(RpcError::SubscriptionError(
					"Connection closed during handshake".to_string(),
				));
			}
		}

		// Return stream of account notifications
		let stream = ws_receiver.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
					Ok(parsed) => match parsed.get("method").and_then(Value::as_str) {
						Some("programNotification") => {
							Some(parse_program_notification(&parsed))
						}
						Some(other) => {
							debug!("Ignoring notification method: {}", other);
							None
						}
						None => Some(Err(RpcError::SubscriptionError(
							"Message missing method field".to_string(),
						))),
					},
					Err(e) => Some(Err(RpcError::JsonError(e))),
				},
				// Keep-alives are answered by tungstenite itself
				Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
				Ok(Message::Close(frame)) => {
					info!("Program subscription closed by server: {:?}", frame);
					None
				}
				Ok(_) => Some(Err(RpcError::SubscriptionError(
					"Unexpected message type".to_string(),
				))),
				Err(e) => Some(Err(RpcError::WebSocketError(e))),
			}
		});

		Ok(Box::pin(stream))
	}

	/// Execute a JSON-RPC request.
	///
	/// # Arguments
	/// * `method` - The JSON-RPC method name.
	/// * `params` - Positional parameters.
	///
	/// # Returns
	/// The `result` member of the response, or an `RpcError` if the request fails.
	pub async fn execute_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params
		});

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await
			.map_err(|e| if e.is_timeout() { RpcError::Timeout } else { e.into() })?;

		let status = response.status();
		if status.as_u16() == 429 {
			let retry_after = response
				.headers()
				.get(RETRY_AFTER)
				.and_then(|v| v.to_str().ok())
				.and_then(|v| v.trim().parse::<u64>().ok())
				.map(Duration::from_secs);
			warn!("{} rate limited (retry after {:?})", method, retry_after);
			return Err(RpcError::RateLimited { retry_after });
		}

		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(RpcError::Status {
				status: status.as_u16(),
				body,
			});
		}

		let mut response_json: Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			return Err(rpc_error(error));
		}

		response_json
			.get_mut("result")
			.map(Value::take)
			.ok_or_else(|| RpcError::InvalidResponse(format!("{} returned no result", method)))
	}
}

/// Map a JSON-RPC `error` member onto an `RpcError`.
fn rpc_error(error: &Value) -> RpcError {
	let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
	let message = error
		.get("message")
		.and_then(Value::as_str)
		.unwrap_or("Unknown RPC error")
		.to_string();
	if code == 429 {
		return RpcError::RateLimited { retry_after: None };
	}
	RpcError::Rpc { code, message }
}

fn parse_program_notification(parsed: &Value) -> Result<AccountNotification, RpcError> {
	let result = parsed
		.get("params")
		.and_then(|p| p.get("result"))
		.cloned()
		.ok_or_else(|| RpcError::InvalidResponse("Notification missing result".to_string()))?;
	let envelope: RpcEnvelope<KeyedUiAccount> = serde_json::from_value(result)?;
	let (address, account) = envelope.value.into_raw()?;

	Ok(AccountNotification {
		address,
		account,
		slot: envelope.context.slot,
	})
}

#[async_trait::async_trait]
impl RpcTransport for SolanaRpcClient {
	async fn get_multiple_accounts(
		&self,
		addresses: &[Address],
	) -> Result<Slotted<Vec<Option<RawAccount>>>, RpcError> {
		let keys: Vec<String> = addresses.iter().map(Address::to_string).collect();
		let params = json!([keys, { "encoding": "base64", "commitment": COMMITMENT }]);

		let result = self.execute_request("getMultipleAccounts", params).await?;
		let envelope: RpcEnvelope<Vec<Option<UiAccount>>> = serde_json::from_value(result)?;

		let value = envelope
			.value
			.into_iter()
			.map(|account| account.map(UiAccount::into_raw).transpose())
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Slotted {
			slot: envelope.context.slot,
			value,
		})
	}

	async fn get_account_info(
		&self,
		address: &Address,
	) -> Result<Slotted<Option<RawAccount>>, RpcError> {
		let params = json!([
			address.to_string(),
			{ "encoding": "base64", "commitment": COMMITMENT }
		]);
		let result = self.execute_request("getAccountInfo", params).await?;
		let envelope: RpcEnvelope<Option<UiAccount>> = serde_json::from_value(result)?;

		Ok(Slotted {
			slot: envelope.context.slot,
			value: envelope.value.map(UiAccount::into_raw).transpose()?,
		})
	}

	async fn get_program_accounts(
		&self,
		program: &Address,
		query: &ProgramAccountsQuery,
	) -> Result<Slotted<Vec<(Address, RawAccount)>>, RpcError> {
		let mut config = json!({
			"encoding": "base64",
			"commitment": COMMITMENT,
			"withContext": true,
			"filters": query.filters.iter().map(AccountFilter::to_json).collect::<Vec<_>>()
		});
		if let Some(slice) = query.data_slice {
			config["dataSlice"] = json!({ "offset": slice.offset, "length": slice.length });
		}

		let result = self
			.execute_request("getProgramAccounts", json!([program.to_string(), config]))
			.await?;
		let envelope: RpcEnvelope<Vec<KeyedUiAccount>> = serde_json::from_value(result)?;

		let value = envelope
			.value
			.into_iter()
			.map(KeyedUiAccount::into_raw)
			.collect::<Result<Vec<_>, _>>()?;

		debug!(
			"getProgramAccounts {} returned {} accounts at slot {}",
			program,
			value.len(),
			envelope.context.slot
		);

		Ok(Slotted {
			slot: envelope.context.slot,
			value,
		})
	}
}

#[async_trait::async_trait]
impl super::AccountChangeSource for SolanaRpcClient {
	async fn subscribe(
		&self,
		program: &Address,
		filters: &[AccountFilter],
	) -> Result<AccountStream, RpcError> {
		self.subscribe_program(program, filters).await
	}
}
