// Copyright 2025 Cowboy AI, LLC.

//! Durable, manually-acknowledged subscription to the bus streams
//!
//! One durable consumer per configured stream, bound under a single logical
//! consumer name per deployed process group. The receive loop only decodes
//! and validates; accepted events are handed to the delegator on a bounded
//! worker pool so network receive is never blocked by business processing.
//! The subscriber acks only what it discards (malformed or payload-less
//! messages); acknowledgement of accepted messages belongs to the delegator.

use crate::delegator::{AckError, Delegator, MessageAck};
use crate::envelope::ChangeEnvelope;
use async_nats::jetstream::{self, consumer};
use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors that can occur while establishing the subscriptions
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Failed to bind the JetStream stream
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Failed to create or bind the durable consumer
    #[error("Consumer error: {0}")]
    ConsumerError(String),
}

/// One (stream, topics) entry of the subscription table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSubscription {
    /// JetStream stream name
    pub stream: String,
    /// Subjects consumed from that stream
    pub subjects: Vec<String>,
}

/// Configuration for the subscriber
///
/// The subscription table is fixed at startup and is the authoritative list
/// of event sources the system understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Logical consumer name shared by all replicas of this process group
    pub durable_name: String,
    /// The static (stream -> topics) subscription table
    pub subscriptions: Vec<StreamSubscription>,
    /// Bound on concurrent delegator hand-offs
    pub dispatch_workers: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            durable_name: "choreography".to_string(),
            subscriptions: Vec::new(),
            dispatch_workers: 8,
        }
    }
}

/// Bus subscriber feeding the delegator
pub struct Subscriber {
    jetstream: jetstream::Context,
    delegator: Arc<Delegator>,
    config: SubscriberConfig,
}

/// Acknowledgement handle over one JetStream message
struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAck for JetStreamAck {
    async fn ack(&self) -> Result<(), AckError> {
        self.message
            .ack()
            .await
            .map_err(|e| AckError::Bus(e.to_string()))
    }
}

impl Subscriber {
    /// Create a subscriber over an established NATS connection
    pub fn new(client: Client, delegator: Arc<Delegator>, config: SubscriberConfig) -> Self {
        Self {
            jetstream: jetstream::new(client),
            delegator,
            config,
        }
    }

    /// Bind all configured consumers and start one receive loop per stream
    ///
    /// Consumer binding errors surface here; after spawn, receive errors are
    /// logged and the loops keep running on the bus client's reconnect.
    pub async fn spawn(self) -> Result<Vec<JoinHandle<()>>, SubscribeError> {
        let limiter = Arc::new(Semaphore::new(self.config.dispatch_workers));
        let mut handles = Vec::with_capacity(self.config.subscriptions.len());

        for subscription in &self.config.subscriptions {
            let stream = self
                .jetstream
                .get_or_create_stream(jetstream::stream::Config {
                    name: subscription.stream.clone(),
                    subjects: subscription.subjects.clone(),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    SubscribeError::StreamError(format!(
                        "Failed to bind stream {}: {}",
                        subscription.stream, e
                    ))
                })?;

            let consumer_name =
                format!("{}-{}", self.config.durable_name, subscription.stream).to_lowercase();

            let consumer = stream
                .get_or_create_consumer(
                    &consumer_name,
                    consumer::pull::Config {
                        durable_name: Some(consumer_name.clone()),
                        filter_subjects: subscription.subjects.clone(),
                        ack_policy: consumer::AckPolicy::Explicit,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| {
                    SubscribeError::ConsumerError(format!(
                        "Failed to bind consumer {consumer_name}: {e}"
                    ))
                })?;

            let delegator = self.delegator.clone();
            let limiter = limiter.clone();
            let stream_name = subscription.stream.clone();

            handles.push(tokio::spawn(async move {
                let mut messages = match consumer.messages().await {
                    Ok(messages) => messages,
                    Err(e) => {
                        error!(stream = %stream_name, "Failed to open message stream: {e}");
                        return;
                    }
                };

                info!(stream = %stream_name, "Subscriber receive loop started");

                while let Some(message) = messages.next().await {
                    match message {
                        Ok(message) => receive(&delegator, &limiter, message).await,
                        Err(e) => warn!(stream = %stream_name, "Receive error: {e}"),
                    }
                }

                info!(stream = %stream_name, "Subscriber receive loop ended");
            }));
        }

        Ok(handles)
    }
}

/// Decode one message and hand it off, or ack-and-drop it
async fn receive(delegator: &Arc<Delegator>, limiter: &Arc<Semaphore>, message: jetstream::Message) {
    let envelope = match ChangeEnvelope::decode(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Dropping malformed message: {e}");
            ack_discarded(&message).await;
            return;
        }
    };

    let event = match envelope.into_new_event() {
        Ok(event) => event,
        Err(e) => {
            // Payload-less upstream message; acknowledged, never persisted
            warn!("Dropping message without payload: {e}");
            ack_discarded(&message).await;
            return;
        }
    };

    let Ok(permit) = limiter.clone().acquire_owned().await else {
        return;
    };

    let delegator = delegator.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let acker = JetStreamAck { message };
        if let Err(e) = delegator.delegate(event, &acker).await {
            error!("Delegation failed, message left for redelivery: {e}");
        }
    });
}

/// Ack a message the pipeline will never persist
async fn ack_discarded(message: &jetstream::Message) {
    if let Err(e) = message.ack().await {
        warn!("Failed to ack discarded message: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SubscriberConfig::default();
        assert_eq!(config.durable_name, "choreography");
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.dispatch_workers, 8);
    }

    #[test]
    fn subscription_table_round_trips_through_serde() {
        let config = SubscriberConfig {
            durable_name: "orders".to_string(),
            subscriptions: vec![StreamSubscription {
                stream: "CHANGES".to_string(),
                subjects: vec!["changes.order.>".to_string(), "changes.customer.>".to_string()],
            }],
            dispatch_workers: 4,
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed: SubscriberConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.subscriptions[0].stream, "CHANGES");
        assert_eq!(parsed.subscriptions[0].subjects.len(), 2);
    }
}
