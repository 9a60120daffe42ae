use super::SyncError;
use super::events::{ChainEvent, EventDispatcher, convert_notification};
use crate::governance::Address;
use crate::rpc::{AccountChangeSource, AccountStream};
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Configuration for the program watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// Resubscribe when the stream is silent this long
	pub idle_timeout: Duration,
	/// First delay before resubscribing after a failure
	pub reconnect_initial: Duration,
	/// Upper bound for the resubscribe delay
	pub reconnect_max: Duration,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			idle_timeout: Duration::from_secs(300),
			reconnect_initial: Duration::from_millis(500),
			reconnect_max: Duration::from_secs(30),
		}
	}
}

enum StreamEnd {
	Shutdown,
	Lost(String),
}

/// Follows account changes of one program and dispatches them as events
pub struct ProgramWatcher {
	source: Arc<dyn AccountChangeSource>,
	program: Address,
	config: WatcherConfig,
}

impl ProgramWatcher {
	pub fn new(source: Arc<dyn AccountChangeSource>, program: Address, config: WatcherConfig) -> Self {
		Self {
			source,
			program,
			config,
		}
	}

	/// Watch until `shutdown` turns true or its sender is dropped.
	///
	/// Lost subscriptions are re-established with exponential backoff. The
	/// watcher only gives up when the node rejects the subscription itself,
	/// for example because the program id is not valid.
	pub async fn run(
		&self,
		dispatcher: &mut EventDispatcher,
		mut shutdown: watch::Receiver<bool>,
	) -> Result<(), SyncError> {
		let mut backoff = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.reconnect_initial)
			.with_max_interval(self.config.reconnect_max)
			.with_max_elapsed_time(None)
			.build();
		let mut failures = 0u32;

		info!("Watching program {}", self.program);

		loop {
			if *shutdown.borrow() {
				return Ok(());
			}

			match self.source.subscribe(&self.program, &[]).await {
				Ok(stream) => {
					if failures > 0 {
						dispatcher
							.dispatch(&ChainEvent::Resubscribed { attempts: failures })
							.await;
					}
					failures = 0;
					backoff.reset();

					match self.consume(stream, dispatcher, &mut shutdown).await {
						StreamEnd::Shutdown => return Ok(()),
						StreamEnd::Lost(reason) => {
							warn!("Subscription to {} lost: {}", self.program, reason);
							dispatcher
								.dispatch(&ChainEvent::SubscriptionLost { reason })
								.await;
						}
					}
				}
				Err(e) if !e.is_transient() => {
					error!("Subscription to {} rejected: {}", self.program, e);
					return Err(SyncError::Rpc(e));
				}
				Err(e) => {
					warn!("Failed to subscribe to {}: {}", self.program, e);
					dispatcher
						.dispatch(&ChainEvent::SubscriptionLost {
							reason: e.to_string(),
						})
						.await;
				}
			}

			failures += 1;
			let delay = backoff.next_backoff().unwrap_or(self.config.reconnect_max);
			debug!("Resubscribing in {:?} (failure {})", delay, failures);

			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						return Ok(());
					}
				}
			}
		}
	}

	async fn consume(
		&self,
		mut stream: AccountStream,
		dispatcher: &mut EventDispatcher,
		shutdown: &mut watch::Receiver<bool>,
	) -> StreamEnd {
		let mut last_event_time = Instant::now();

		loop {
			let timeout = tokio::time::sleep_until(last_event_time + self.config.idle_timeout);
			tokio::pin!(timeout);

			tokio::select! {
				item = stream.next() => {
					last_event_time = Instant::now();
					match item {
						Some(Ok(notification)) => {
							let event = convert_notification(&notification);
							dispatcher.dispatch(&event).await;
						}
						Some(Err(e)) => return StreamEnd::Lost(e.to_string()),
						None => return StreamEnd::Lost("stream closed".to_string()),
					}
				}
				_ = &mut timeout => {
					return StreamEnd::Lost(format!(
						"no notifications for {} seconds",
						self.config.idle_timeout.as_secs()
					));
				}
				changed = shutdown.changed() => {
					if changed.is_err() || *shutdown.borrow() {
						info!("Stopping watcher for {}", self.program);
						return StreamEnd::Shutdown;
					}
				}
			}
		}
	}
}
