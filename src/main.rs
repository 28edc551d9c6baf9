use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_service::{
    api::{AppState, run_api_server},
    clients::{
        database::PostgresNotificationStore,
        health::HealthChecker,
        provider::{EMAIL_PROVIDER, SMS_PROVIDER},
        rbmq::RabbitMqClient,
        redis::RedisClient,
        user::{USER_SERVICE, UserServiceClient},
    },
    config::Config,
    dead_letter::DeadLetterHandler,
    dispatch::DispatchCoordinator,
    notifiers::{EmailNotifier, NotificationSender, NotifierRegistry, SmsNotifier},
    scheduler::{RetryPolicy, RetryScheduler},
    store::NotificationStore,
    worker::{run_dead_letter_worker, run_event_worker},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;

    info!(
        events_queue = %config.events_queue_name,
        workers = config.worker_concurrency,
        email_enabled = config.email_enabled,
        sms_enabled = config.sms_enabled,
        "Configuration loaded"
    );

    let store: Arc<dyn NotificationStore> =
        Arc::new(
        PostgresNotificationStore::connect(&config.database_url, config.database_max_connections)
            .await?,
    );
    let redis = RedisClient::connect(&config).await?;

    let mut breakers = vec![USER_SERVICE];
    let mut registry = NotifierRegistry::new();

    if config.email_enabled {
        let notifier = EmailNotifier::new(&config.email_provider()?)?
            .with_circuit_breaker(redis.circuit_breaker(EMAIL_PROVIDER));
        registry = registry.register(Arc::new(notifier));
        breakers.push(EMAIL_PROVIDER);
    }

    if config.sms_enabled {
        let notifier = SmsNotifier::new(&config.sms_provider()?)?
            .with_circuit_breaker(redis.circuit_breaker(SMS_PROVIDER));
        registry = registry.register(Arc::new(notifier));
        breakers.push(SMS_PROVIDER);
    }

    if registry.channels().is_empty() {
        warn!("No notification channel enabled, events will be consumed without sending");
    }

    let users = UserServiceClient::new(&config)?
        .with_circuit_breaker(redis.circuit_breaker(USER_SERVICE));

    let tasks = TaskTracker::new();
    let shutdown = CancellationToken::new();
    let retry_policy = RetryPolicy::from_config(&config);
    let sender = NotificationSender::new(store.clone(), config.send_timeout());

    let coordinator = DispatchCoordinator::new(
        store.clone(),
        Arc::new(users),
        registry.clone(),
        sender.clone(),
        tasks.clone(),
        config.tracking_base_url.clone(),
    );

    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);

    for n in 0..config.worker_concurrency {
        let consumer_tag = format!("{}-{}", config.consumer_group, n);
        let (channel, consumer) = rabbitmq.consume_events(&consumer_tag).await?;

        tasks.spawn(run_event_worker(
            consumer_tag,
            channel,
            consumer,
            coordinator.clone(),
            config.max_delivery_attempts,
            shutdown.clone(),
        ));
    }

    let dead_letter_tag = format!("{}-dlq", config.consumer_group);
    let (channel, consumer) = rabbitmq.consume_dead_letters(&dead_letter_tag).await?;
    tasks.spawn(run_dead_letter_worker(
        dead_letter_tag,
        channel,
        consumer,
        DeadLetterHandler::new(store.clone()),
        shutdown.clone(),
    ));

    let scheduler = RetryScheduler::new(store.clone(), registry, sender, retry_policy.clone());
    let scheduler_shutdown = shutdown.clone();
    tasks.spawn(async move { scheduler.run(scheduler_shutdown).await });

    let state = Arc::new(AppState {
        store: store.clone(),
        health_checker: HealthChecker::new(store)
            .with_redis(redis, &breakers)
            .with_rabbitmq(rabbitmq),
        retry_policy,
    });

    let api_shutdown = shutdown.clone();
    let port = config.server_port;
    tasks.spawn(async move {
        if let Err(e) = run_api_server(state, port, api_shutdown.clone()).await {
            error!(error = %e, "Query API server failed");
            api_shutdown.cancel();
        }
    });

    info!("Notification service running");

    let component_failed = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            false
        }
        _ = shutdown.cancelled() => {
            warn!("Shutting down after component failure");
            true
        }
    };

    shutdown.cancel();
    tasks.close();
    tasks.wait().await;

    info!("Notification service stopped");

    // Non-zero exit so the supervisor restarts us.
    if component_failed {
        return Err(anyhow!("Stopped after a component failure"));
    }

    Ok(())
}
