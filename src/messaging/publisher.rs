use crate::messaging::config::RabbitMqConfig;
use chrono::{DateTime, Utc};
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Failed to connect to RabbitMQ: {0}")]
    ConnectionError(#[from] lapin::Error),

    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Publisher not initialized")]
    NotInitialized
}

/// Message sent when a member's best score beats the leaderboard record
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardRecordMessage {
    pub leaderboard_id: i64,
    pub score_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub action: String
}

/// Message sent when a member takes over the #1 position
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardTopPlayerMessage {
    pub leaderboard_id: i64,
    pub user_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub action: String
}

/// MassTransit message envelope structure
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MassTransitEnvelope<T> {
    message_id: String,
    conversation_id: String,
    source_address: String,
    destination_address: String,
    message_type: Vec<String>,
    message: T,
    sent_time: DateTime<Utc>
}

/// RabbitMQ publisher for leaderboard record events
pub struct RabbitMqPublisher {
    connection: Option<Arc<Connection>>,
    channel: Option<Channel>,
    exchange: String,
    routing_key: String
}

impl RabbitMqPublisher {
    /// Creates a new RabbitMQ publisher instance
    pub fn new(exchange: String, routing_key: String) -> Self {
        Self {
            connection: None,
            channel: None,
            exchange,
            routing_key
        }
    }

    /// Creates a new RabbitMQ publisher from configuration
    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self::new(config.exchange.clone(), config.routing_key.clone())
    }

    /// Creates and connects a publisher from configuration
    pub async fn connect_from_config(config: &RabbitMqConfig) -> Result<Self, PublisherError> {
        let mut publisher = Self::from_config(config);
        publisher.connect(&config.connection_url()).await?;
        Ok(publisher)
    }

    /// Connects to RabbitMQ and initializes the publisher
    pub async fn connect(&mut self, rabbitmq_url: &str) -> Result<(), PublisherError> {
        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default()).await?;
        let connection = Arc::new(connection);

        let channel = connection.create_channel().await?;

        // Declare the exchange (fanout type for broadcasting)
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default()
            )
            .await?;

        self.connection = Some(connection);
        self.channel = Some(channel);

        info!("Connected to RabbitMQ at {}", rabbitmq_url);
        info!(
            "Exchange '{}' declared with routing key '{}'",
            self.exchange, self.routing_key
        );

        Ok(())
    }

    /// Publishes a leaderboard record message
    pub async fn publish_leaderboard_record(&self, leaderboard_id: i64, score_id: i64) -> Result<(), PublisherError> {
        let message = LeaderboardRecordMessage {
            leaderboard_id,
            score_id,
            occurred_at: Utc::now(),
            action: "record".to_string()
        };

        self.publish(message, "urn:message:Leaderboards:LeaderboardRecordMessage")
            .await?;

        debug!(
            "Published leaderboard record message for leaderboard {} score {}",
            leaderboard_id, score_id
        );
        Ok(())
    }

    /// Publishes a top player change message
    pub async fn publish_leaderboard_top_player(
        &self,
        leaderboard_id: i64,
        user_id: i64
    ) -> Result<(), PublisherError> {
        let message = LeaderboardTopPlayerMessage {
            leaderboard_id,
            user_id,
            occurred_at: Utc::now(),
            action: "top_player".to_string()
        };

        self.publish(message, "urn:message:Leaderboards:LeaderboardTopPlayerMessage")
            .await?;

        debug!(
            "Published top player message for leaderboard {} user {}",
            leaderboard_id, user_id
        );
        Ok(())
    }

    async fn publish<T: Serialize>(&self, message: T, message_type: &str) -> Result<(), PublisherError> {
        let channel = self.channel.as_ref().ok_or(PublisherError::NotInitialized)?;

        let message_id = Uuid::new_v4().to_string();
        let conversation_id = Uuid::new_v4().to_string();

        // Wrap in MassTransit envelope
        let envelope = MassTransitEnvelope {
            message_id: message_id.clone(),
            conversation_id,
            source_address: format!("rabbitmq://localhost/{}", self.exchange),
            destination_address: format!("rabbitmq://localhost/{}", self.routing_key),
            message_type: vec![message_type.to_string()],
            message,
            sent_time: Utc::now()
        };

        let payload = serde_json::to_vec(&envelope)?;

        // Create headers for MassTransit
        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from("Content-Type"),
            AMQPValue::LongString(LongString::from("application/vnd.masstransit+json"))
        );

        channel
            .basic_publish(
                &self.exchange,
                &self.routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/vnd.masstransit+json".into())
                    .with_headers(FieldTable::from(headers))
                    .with_message_id(message_id.into())
                    .with_timestamp(Utc::now().timestamp() as u64)
            )
            .await?;

        Ok(())
    }

    /// Checks if the publisher is connected
    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && self.channel.is_some()
    }

    /// Closes the connection to RabbitMQ
    pub async fn close(&mut self) -> Result<(), PublisherError> {
        if let Some(channel) = self.channel.take() {
            channel.close(200, "Normal shutdown").await?;
        }

        if let Some(connection) = self.connection.take() {
            if let Ok(conn) = Arc::try_unwrap(connection) {
                conn.close(200, "Normal shutdown").await?;
            }
        }

        info!("RabbitMQ connection closed");
        Ok(())
    }
}

impl Drop for RabbitMqPublisher {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("RabbitMQ publisher dropped without proper closure");
        }
    }
}
