//! Event bus for cross-pod fan-out
//!
//! NATS-backed publish/subscribe used by the trust plane for policy cache
//! coherence and tenant provisioning notifications. Delivery is at-least-once
//! with durable fan-out across pods; consumers must tolerate duplicates.

pub mod events;
pub mod nats;

pub use events::{
    AppSettingsUpdatedEvent, EventEnvelope, PolicyChangedEvent, APP_SETTINGS_UPDATED,
    POLICY_CHANGED,
};
pub use nats::NatsClient;

use serde::{de::DeserializeOwned, Serialize};
use shared_error::AppError;
use tracing::debug;

/// Bus handle held by services; `Disabled` drops publications so single-node
/// deployments run without a broker
#[derive(Clone)]
pub enum EventBus {
    Nats(NatsClient),
    Disabled,
}

impl EventBus {
    pub async fn connect(nats_url: Option<&str>) -> Result<Self, AppError> {
        match nats_url {
            Some(url) => Ok(Self::Nats(NatsClient::connect(url).await?)),
            None => {
                debug!("Event bus disabled (no NATS URL configured)");
                Ok(Self::Disabled)
            },
        }
    }

    pub async fn publish<T: Serialize>(
        &self,
        subject: &str,
        event: EventEnvelope<T>,
    ) -> Result<(), AppError> {
        match self {
            Self::Nats(client) => client.publish_event(subject, event).await,
            Self::Disabled => Ok(()),
        }
    }

    pub async fn subscribe<T, F, Fut>(&self, subject: &str, handler: F) -> Result<(), AppError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(EventEnvelope<T>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        match self {
            Self::Nats(client) => client.subscribe_event(subject, handler).await,
            Self::Disabled => Ok(()),
        }
    }
}
