//! Run command handler: wires the store, transport, router, mention
//! tracker, and sweeper together and drives the consume loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use groupwarden::actions::{build_registry, GroupDirectory};
use groupwarden::bus::{ChatKind, InboundEvent, InboundMessage, UpdateBus};
use groupwarden::classifier::{HttpClassifier, IntentClassifier};
use groupwarden::config::Config;
use groupwarden::dialog::DialogStateService;
use groupwarden::mentions::{MentionSweeper, MentionTracker};
use groupwarden::router::{MessageRouter, Services};
use groupwarden::store::{ConversationStore, RedisStore};
use groupwarden::transport::{ChatTransport, TelegramTransport};

/// Start the bot.
pub(crate) async fn cmd_run() -> Result<()> {
    println!("Starting GroupWarden...");

    let config = Config::load().with_context(|| "Failed to load configuration")?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration at {:?}", Config::path()))?;
    Config::set_global(config.clone());

    let store: Arc<dyn ConversationStore> = Arc::new(
        RedisStore::connect(&config.store.url)
            .await
            .with_context(|| format!("Failed to connect to store at {}", config.store.url))?,
    );
    info!("Connected to store at {}", config.store.url);

    let bus = Arc::new(UpdateBus::new());

    let mut transport = TelegramTransport::new(config.telegram.clone(), bus.clone());
    transport
        .start()
        .await
        .with_context(|| "Failed to start Telegram transport")?;
    let transport: Arc<dyn ChatTransport> = Arc::new(transport);

    let prefix = config.store.key_prefix.clone();
    let services = Services {
        dialogs: Arc::new(DialogStateService::new(
            Arc::clone(&store),
            &prefix,
            config.dialog.ttl_secs,
        )),
        store: Arc::clone(&store),
        transport: Arc::clone(&transport),
        key_prefix: prefix.clone(),
    };

    let classifier: Arc<dyn IntentClassifier> =
        Arc::new(HttpClassifier::from_config(&config.classifier)?);
    let router = Arc::new(MessageRouter::new(
        build_registry(),
        classifier,
        services,
        config.classifier.clone(),
    ));

    let tracker = Arc::new(MentionTracker::new(Arc::clone(&store), &prefix));
    let directory = Arc::new(GroupDirectory::new(Arc::clone(&store), &prefix));

    let sweeper = if config.sweep.enabled {
        let sweeper = Arc::new(MentionSweeper::new(
            &config.sweep,
            Arc::clone(&tracker),
            Arc::clone(&transport),
        ));
        sweeper.start().await;
        Some(sweeper)
    } else {
        warn!("Mention sweep disabled in configuration");
        None
    };

    let loop_handle = {
        let bus = Arc::clone(&bus);
        let router = Arc::clone(&router);
        let tracker = Arc::clone(&tracker);
        let directory = Arc::clone(&directory);
        tokio::spawn(async move {
            while let Some(event) = bus.consume().await {
                match event {
                    InboundEvent::Message(msg) => {
                        handle_message(&router, &tracker, &directory, msg).await;
                    }
                    InboundEvent::MemberJoined(joined) => {
                        if let Err(e) = directory
                            .record(&joined.chat_id, joined.chat_title.as_deref())
                            .await
                        {
                            warn!(chat = %joined.chat_id, "failed to record group: {}", e);
                        }
                        router.dispatch_member_joined(&joined).await;
                    }
                }
            }
            info!("Update bus closed, consume loop exiting");
        })
    };

    println!();
    println!("GroupWarden is running. Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    if let Some(sweeper) = &sweeper {
        sweeper.stop().await;
    }
    loop_handle.abort();

    println!("Goodbye.");
    Ok(())
}

/// Housekeeping plus routing for one message.
///
/// Housekeeping failures are logged but never keep the message from
/// reaching the router; a broken store should degrade mention tracking,
/// not the whole bot.
async fn handle_message(
    router: &MessageRouter,
    tracker: &MentionTracker,
    directory: &GroupDirectory,
    msg: InboundMessage,
) {
    if let Err(e) = tracker.learn_user(&msg).await {
        warn!(chat = %msg.chat_id, "failed to learn username binding: {}", e);
    }

    if msg.chat_kind == ChatKind::Group {
        if let Err(e) = directory.record(&msg.chat_id, msg.chat_title.as_deref()).await {
            warn!(chat = %msg.chat_id, "failed to record group: {}", e);
        }
        if let Err(e) = tracker.log_message(&msg).await {
            warn!(chat = %msg.chat_id, "failed to log message: {}", e);
        }
        match tracker.mark_responses(&msg).await {
            Ok(0) => {}
            Ok(closed) => debug!(chat = %msg.chat_id, closed, "mentions answered"),
            Err(e) => warn!(chat = %msg.chat_id, "failed to mark responses: {}", e),
        }
        if !msg.mentions.is_empty() {
            if let Err(e) = tracker.record_mention(&msg).await {
                error!(chat = %msg.chat_id, "failed to record mention: {}", e);
            }
        }
    }

    let decision = router.dispatch(msg).await;
    debug!(?decision, "message routed");
}
