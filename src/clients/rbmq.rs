use anyhow::{Error, Result, anyhow};
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tracing::{debug, info};

use crate::config::Config;

/// One connection shared by every worker; each worker opens its own channel.
pub struct RabbitMqClient {
    connection: Connection,
    events_queue_name: String,
    dead_letter_queue_name: String,
    prefetch_count: u16,
    manual_ack: bool,
}

/// A per-worker channel bound to a single consumer.
pub struct WorkerChannel {
    channel: Channel,
    manual_ack: bool,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        info!("RabbitMQ connection established");

        let client = Self {
            connection,
            events_queue_name: config.events_queue_name.clone(),
            dead_letter_queue_name: config.dead_letter_queue_name.clone(),
            prefetch_count: config.prefetch_count,
            manual_ack: config.manual_ack,
        };

        client.declare_topology().await?;

        Ok(client)
    }

    async fn declare_topology(&self) -> Result<(), Error> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .queue_declare(
                &self.dead_letter_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare dead-letter queue: {}", e))?;

        debug!(queue = %self.dead_letter_queue_name, "Dead-letter queue declared");

        channel
            .queue_declare(
                &self.events_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                events_queue_arguments(&self.dead_letter_queue_name),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare events queue: {}", e))?;

        debug!(queue = %self.events_queue_name, "Events queue declared");

        Ok(())
    }

    pub async fn consume_events(&self, consumer_tag: &str) -> Result<(WorkerChannel, Consumer), Error> {
        self.consume(&self.events_queue_name, consumer_tag, self.manual_ack)
            .await
    }

    /// Dead letters are always consumed with manual acks.
    pub async fn consume_dead_letters(
        &self,
        consumer_tag: &str,
    ) -> Result<(WorkerChannel, Consumer), Error> {
        self.consume(&self.dead_letter_queue_name, consumer_tag, true)
            .await
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        manual_ack: bool,
    ) -> Result<(WorkerChannel, Consumer), Error> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: !manual_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue, consumer_tag, manual_ack, "Consumer created");

        Ok((WorkerChannel { channel, manual_ack }, consumer))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

impl WorkerChannel {
    pub fn manual_ack(&self) -> bool {
        self.manual_ack
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))
    }

    /// Hands the message back to the broker for another delivery.
    pub async fn requeue(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow!("Failed to requeue message: {}", e))
    }

    /// Rejects without requeue; the broker routes it to the dead-letter queue.
    pub async fn reject(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))
    }
}

fn events_queue_arguments(dead_letter_queue_name: &str) -> FieldTable {
    let mut arguments = FieldTable::default();

    arguments.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-exchange"),
        AMQPValue::LongString(LongString::from("")),
    );
    arguments.insert(
        ShortString::from("x-dead-letter-routing-key"),
        AMQPValue::LongString(LongString::from(dead_letter_queue_name)),
    );

    arguments
}
