use crate::command::{CommandError, CommandOutcome, CommandRouter, RouterStats};
use crate::config::{ConfigError, SimulatorConfig};
use crate::fleet::{Fleet, FleetError};
use crate::module::ModuleState;
use crate::telemetry::{TelemetryPublisher, TickReport};
use crate::transport::{BusEvent, EventSource, Transport, TransportError};
use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// State guarded by the single fleet lock.
#[derive(Debug)]
struct Shared {
    fleet: Fleet,
    router: CommandRouter,
}

/// Application context: the fleet, the bus handle and the publish cadence.
///
/// Inbound commands and telemetry ticks both go through the fleet lock. The lock
/// is never held across a transport call: commands compute their subscription
/// change under the lock and apply it after releasing it, telemetry copies a
/// frame out and publishes it afterwards.
///
/// Subscription changes are serialised by their own lock, held from routing a
/// command until its broker calls finish. Lock order is `resubscribe` or
/// `publisher` first, then the fleet lock.
pub struct Simulator<T: ?Sized> {
    shared: Mutex<Shared>,
    resubscribe: Mutex<()>,
    publisher: Mutex<TelemetryPublisher>,
    transport: Arc<T>,
    started: Instant,
    interval: Duration,
}

impl<T: Transport + ?Sized> Simulator<T> {
    pub fn new(fleet: Fleet, transport: Arc<T>, interval: Duration) -> Self {
        Self {
            shared: Mutex::new(Shared {
                fleet,
                router: CommandRouter::new(),
            }),
            resubscribe: Mutex::new(()),
            publisher: Mutex::new(TelemetryPublisher::new()),
            transport,
            started: Instant::now(),
            interval,
        }
    }

    pub fn from_config(config: &SimulatorConfig, transport: Arc<T>) -> Result<Self, SimulatorError> {
        config.validate()?;
        let fleet = Fleet::new(config.num_modules, config.num_cells)?;
        Ok(Self::new(fleet, transport, config.publish_interval()))
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn snapshot(&self) -> Vec<ModuleState> {
        self.shared.lock().await.fleet.states()
    }

    pub async fn router_stats(&self) -> RouterStats {
        self.shared.lock().await.router.stats()
    }

    /// Subscribes every module's command topics under its current name.
    pub async fn subscribe_all(&self) -> Result<usize, SimulatorError> {
        let _resubscribing = self.resubscribe.lock().await;
        let topics = self.shared.lock().await.fleet.subscription_topics();
        for topic in &topics {
            self.transport.subscribe(topic).await?;
        }
        info!("📥 Subscribed to {} command topics", topics.len());
        Ok(topics.len())
    }

    /// Routes one inbound message and applies it.
    ///
    /// A rename swaps the route table under the lock, then moves the broker
    /// subscriptions: new topics are subscribed before the old ones are dropped.
    /// The two steps are not atomic at the broker; a message for the old name
    /// that slips through in between finds no route and is ignored. Concurrent
    /// callers wait until the previous subscription change has fully landed.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<CommandOutcome, CommandError> {
        let _resubscribing = self.resubscribe.lock().await;
        let outcome = {
            let mut shared = self.shared.lock().await;
            let Shared { fleet, router } = &mut *shared;
            router.dispatch(fleet, topic, payload)?
        };

        if let CommandOutcome::Renamed(change) = &outcome {
            for topic in &change.subscribe {
                if let Err(e) = self.transport.subscribe(topic).await {
                    error!("Failed to subscribe after rename: {}", e);
                }
            }
            for topic in &change.retire {
                if let Err(e) = self.transport.unsubscribe(topic).await {
                    warn!("Failed to retire subscription after rename: {}", e);
                }
            }
            info!(
                module = change.module + 1,
                "📥 Moved {} subscriptions to the new name",
                change.subscribe.len()
            );
        }

        Ok(outcome)
    }

    /// Publishes one telemetry frame for the whole fleet.
    ///
    /// Frames are collected and published in the order they acquire the
    /// publisher, so a retained value is never overwritten by an older one.
    pub async fn publish_telemetry(&self) -> TickReport {
        let mut publisher = self.publisher.lock().await;
        let points = {
            let shared = self.shared.lock().await;
            TelemetryPublisher::collect(&shared.fleet, self.uptime(), &Local::now())
        };
        publisher.publish(self.transport.as_ref(), &points).await
    }

    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::Connected => {
                if let Err(e) = self.subscribe_all().await {
                    error!("Resubscription after reconnect failed: {}", e);
                }
            }
            BusEvent::Message(message) => {
                // rejections are logged by the router
                let _ = self.handle_message(&message.topic, &message.payload).await;
            }
        }
    }
}

impl<T: Transport + ?Sized + 'static> Simulator<T> {
    /// Serves commands and telemetry until Ctrl-C.
    pub async fn run<E: EventSource>(self: Arc<Self>, events: E) -> Result<(), SimulatorError> {
        self.run_until(events, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serves commands and telemetry until `shutdown` resolves or the event
    /// stream ends.
    ///
    /// Telemetry runs in its own task so a slow publish never delays command
    /// handling. The first frame goes out one interval after start.
    pub async fn run_until<E, F>(self: Arc<Self>, mut events: E, shutdown: F) -> Result<(), SimulatorError>
    where
        E: EventSource,
        F: Future<Output = ()>,
    {
        let publisher = Arc::clone(&self);
        let telemetry_task = tokio::spawn(async move {
            let period = publisher.interval;
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                publisher.publish_telemetry().await;
            }
        });

        info!("🔋 Battery simulator running, publishing every {:?}", self.interval);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break;
                }
                event = events.next_event() => match event {
                    Ok(Some(event)) => self.handle_event(event).await,
                    Ok(None) => {
                        info!("Bus event stream closed");
                        break;
                    }
                    Err(e) => warn!("Bus error: {}", e),
                }
            }
        }

        telemetry_task.abort();
        Ok(())
    }
}
