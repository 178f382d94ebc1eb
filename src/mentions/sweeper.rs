//! Background sweep over pending mentions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::OutboundMessage;
use crate::config::SweepConfig;
use crate::mentions::{MentionStatus, MentionTracker, PendingMention};
use crate::transport::ChatTransport;

/// Structured result from one sweep pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    /// Unix timestamp of the pass.
    pub timestamp: u64,
    /// Users whose pending mentions were inspected.
    pub users_checked: usize,
    /// Users that received a notification.
    pub users_notified: usize,
    /// Mention records removed (notified or garbage).
    pub removed: usize,
    /// Error message if the pass failed outright.
    pub error: Option<String>,
}

impl SweepResult {
    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn ok(users_checked: usize, users_notified: usize, removed: usize) -> Self {
        Self {
            timestamp: Self::now(),
            users_checked,
            users_notified,
            removed,
            error: None,
        }
    }

    fn err(msg: &str) -> Self {
        Self {
            timestamp: Self::now(),
            users_checked: 0,
            users_notified: 0,
            removed: 0,
            error: Some(msg.to_string()),
        }
    }
}

/// Periodically notifies users about mentions that went unanswered for
/// too long, and prunes records that no longer need tracking.
///
/// Delivery is at-least-once: records are removed only after the
/// notification was sent successfully, so a crash or send failure means
/// the user may be notified again on a later pass, never not at all.
pub struct MentionSweeper {
    tracker: Arc<MentionTracker>,
    transport: Arc<dyn ChatTransport>,
    interval: Duration,
    mention_timeout: Duration,
    running: Arc<RwLock<bool>>,
    /// Count of consecutive failed passes.
    pub(crate) consecutive_failures: Arc<AtomicU32>,
    /// Threshold before warning about a degraded sweep.
    failure_alert_threshold: u32,
}

impl MentionSweeper {
    /// Create a new sweeper from config.
    pub fn new(
        config: &SweepConfig,
        tracker: Arc<MentionTracker>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self {
            tracker,
            transport,
            interval: Duration::from_secs(config.interval_secs.max(30)),
            mention_timeout: Duration::from_secs(config.mention_timeout_secs),
            running: Arc::new(RwLock::new(false)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
            failure_alert_threshold: 3,
        }
    }

    /// Start the sweep loop in the background.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("Mention sweeper already running");
                return;
            }
            *running = true;
        }

        let tracker = Arc::clone(&self.tracker);
        let transport = Arc::clone(&self.transport);
        let interval_duration = self.interval;
        let mention_timeout = self.mention_timeout;
        let running = Arc::clone(&self.running);
        let consecutive_failures = Arc::clone(&self.consecutive_failures);
        let failure_threshold = self.failure_alert_threshold;

        info!(
            "Mention sweeper started (interval={}s, timeout={}s)",
            interval_duration.as_secs(),
            mention_timeout.as_secs()
        );

        let running_clone = Arc::clone(&running);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval_duration);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if !*running.read().await {
                    info!("Mention sweeper stopped");
                    break;
                }

                let result = Self::tick(&tracker, transport.as_ref(), mention_timeout).await;

                if result.error.is_some() {
                    let count = consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if count >= failure_threshold {
                        warn!(
                            consecutive_failures = count,
                            "Sweep: {} consecutive failures, mentions may go unnotified", count
                        );
                    }
                } else {
                    consecutive_failures.store(0, Ordering::Relaxed);
                }
            }
            let mut r = running_clone.write().await;
            *r = false;
        });
    }

    /// Stop the sweep loop.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }

    /// Run one sweep pass immediately, returning a structured result.
    pub async fn trigger_now(&self) -> SweepResult {
        Self::tick(&self.tracker, self.transport.as_ref(), self.mention_timeout).await
    }

    /// Returns whether the sweeper is running.
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Returns the current count of consecutive failed passes.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Returns true if fewer failures than the alert threshold.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < self.failure_alert_threshold
    }

    async fn tick(
        tracker: &MentionTracker,
        transport: &dyn ChatTransport,
        mention_timeout: Duration,
    ) -> SweepResult {
        let users = match tracker.users_with_pending().await {
            Ok(users) => users,
            Err(e) => {
                warn!("Sweep: failed to list users with pending mentions: {}", e);
                return SweepResult::err(&format!("listing users failed: {e}"));
            }
        };

        let users_checked = users.len();
        let mut users_notified = 0;
        let mut removed = 0;
        let mut send_failures = 0;

        for user_id in users {
            match Self::sweep_user(tracker, transport, &user_id, mention_timeout).await {
                Ok(outcome) => {
                    removed += outcome.removed;
                    if outcome.notified {
                        users_notified += 1;
                    }
                    if outcome.send_failed {
                        send_failures += 1;
                    }
                }
                Err(e) => {
                    warn!(user = %user_id, "Sweep: pass over user failed: {}", e);
                    send_failures += 1;
                }
            }
        }

        debug!(
            users_checked,
            users_notified, removed, "sweep pass complete"
        );

        if send_failures > 0 {
            SweepResult::err(&format!("{send_failures} user(s) could not be processed"))
        } else {
            SweepResult::ok(users_checked, users_notified, removed)
        }
    }

    async fn sweep_user(
        tracker: &MentionTracker,
        transport: &dyn ChatTransport,
        user_id: &str,
        mention_timeout: Duration,
    ) -> crate::error::Result<UserSweepOutcome> {
        let now = Utc::now();
        let mut garbage: Vec<PendingMention> = Vec::new();
        let mut due: Vec<PendingMention> = Vec::new();
        let mut waiting = 0usize;

        for (record_key, mention) in tracker.mentions_for_user(user_id).await? {
            let Some(mention) = mention else {
                // Index entry with no record behind it
                tracker.prune_dangling(user_id, &record_key).await?;
                continue;
            };
            match mention.status {
                MentionStatus::Responded | MentionStatus::Read => garbage.push(mention),
                MentionStatus::Unresponded => {
                    if tracker.has_response_in_log(&mention).await? {
                        garbage.push(mention);
                    } else {
                        let age = (now - mention.created_at)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        if age >= mention_timeout {
                            due.push(mention);
                        } else {
                            waiting += 1;
                        }
                    }
                }
            }
        }

        let mut removed = garbage.len();
        tracker.remove_mentions(&garbage).await?;

        if due.is_empty() {
            debug!(user = %user_id, waiting, "no overdue mentions for user");
            return Ok(UserSweepOutcome {
                notified: false,
                removed,
                send_failed: false,
            });
        }

        let notification = compose_notification(&due);
        match transport
            .send_message(OutboundMessage::new(user_id, &notification))
            .await
        {
            Ok(()) => {
                removed += due.len();
                tracker.remove_mentions(&due).await?;
                info!(user = %user_id, mentions = due.len(), "sent mention reminder");
                Ok(UserSweepOutcome {
                    notified: true,
                    removed,
                    send_failed: false,
                })
            }
            Err(e) => {
                // Keep the records so a later pass retries
                warn!(user = %user_id, "mention reminder failed, will retry: {}", e);
                Ok(UserSweepOutcome {
                    notified: false,
                    removed,
                    send_failed: true,
                })
            }
        }
    }
}

struct UserSweepOutcome {
    notified: bool,
    removed: usize,
    send_failed: bool,
}

/// One message per user, covering all their overdue mentions.
fn compose_notification(mentions: &[PendingMention]) -> String {
    let mut out = String::from("You have unanswered mentions:\n");
    for m in mentions {
        let chat = m.chat_title.as_deref().unwrap_or(&m.chat_id);
        out.push_str(&format!("\n• in {}: \"{}\"", chat, m.excerpt));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChatKind, InboundMessage, MentionSpan};
    use crate::error::WardenError;
    use crate::store::MemoryStore;
    use crate::transport::MockChatTransport;
    use std::sync::Mutex;

    fn old_mention(sender: &str, chat: &str, msg_id: &str, mentioned: &str) -> InboundMessage {
        let mut msg = InboundMessage::new(sender, chat, msg_id, "ping?", ChatKind::Group)
            .with_mentions(vec![MentionSpan {
                offset: 0,
                length: 4,
                username: None,
                user_id: Some(mentioned.to_string()),
            }]);
        msg.timestamp = Utc::now() - chrono::Duration::hours(2);
        msg
    }

    fn tracker() -> Arc<MentionTracker> {
        Arc::new(MentionTracker::new(Arc::new(MemoryStore::new()), "gw"))
    }

    #[tokio::test]
    async fn test_overdue_mention_notified_and_removed() {
        let tracker = tracker();
        tracker
            .record_mention(&old_mention("alice", "c1", "10", "bob"))
            .await
            .unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut transport = MockChatTransport::new();
        transport.expect_send_message().returning(move |msg| {
            sent_clone.lock().unwrap().push(msg);
            Ok(())
        });

        let result =
            MentionSweeper::tick(&tracker, &transport, Duration::from_secs(60)).await;
        assert!(result.error.is_none());
        assert_eq!(result.users_notified, 1);
        assert_eq!(result.removed, 1);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "bob");
        assert!(sent[0].content.contains("ping?"));

        assert!(tracker.users_with_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_mention_left_alone() {
        let tracker = tracker();
        let mut msg = old_mention("alice", "c1", "10", "bob");
        msg.timestamp = Utc::now();
        tracker.record_mention(&msg).await.unwrap();

        let mut transport = MockChatTransport::new();
        transport.expect_send_message().never();

        let result =
            MentionSweeper::tick(&tracker, &transport, Duration::from_secs(1800)).await;
        assert!(result.error.is_none());
        assert_eq!(result.users_notified, 0);
        assert_eq!(tracker.users_with_pending().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_records() {
        let tracker = tracker();
        tracker
            .record_mention(&old_mention("alice", "c1", "10", "bob"))
            .await
            .unwrap();

        let mut transport = MockChatTransport::new();
        transport
            .expect_send_message()
            .returning(|_| Err(WardenError::Transport("network down".into())));

        let result =
            MentionSweeper::tick(&tracker, &transport, Duration::from_secs(60)).await;
        assert!(result.error.is_some());

        // Record survives, so a later pass retries the notification
        assert_eq!(tracker.users_with_pending().await.unwrap(), vec!["bob"]);
        let mentions = tracker.mentions_for_user("bob").await.unwrap();
        assert!(mentions[0].1.is_some());
    }

    #[tokio::test]
    async fn test_responded_mention_pruned_without_notification() {
        let tracker = tracker();
        tracker
            .record_mention(&old_mention("alice", "c1", "10", "bob"))
            .await
            .unwrap();
        let reply = InboundMessage::new("carol", "c1", "11", "answered", ChatKind::Group);
        tracker.mark_responses(&reply).await.unwrap();

        let mut transport = MockChatTransport::new();
        transport.expect_send_message().never();

        let result =
            MentionSweeper::tick(&tracker, &transport, Duration::from_secs(60)).await;
        assert!(result.error.is_none());
        assert_eq!(result.removed, 1);
        assert!(tracker.users_with_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_notification_covers_multiple_mentions() {
        let tracker = tracker();
        tracker
            .record_mention(&old_mention("alice", "c1", "10", "bob"))
            .await
            .unwrap();
        tracker
            .record_mention(&old_mention("dave", "c2", "20", "bob"))
            .await
            .unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = Arc::clone(&sent);
        let mut transport = MockChatTransport::new();
        transport.expect_send_message().returning(move |msg| {
            sent_clone.lock().unwrap().push(msg);
            Ok(())
        });

        let result =
            MentionSweeper::tick(&tracker, &transport, Duration::from_secs(60)).await;
        assert_eq!(result.users_notified, 1);
        assert_eq!(result.removed, 2);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_start_stop() {
        let transport: Arc<dyn ChatTransport> = Arc::new(MockChatTransport::new());
        let sweeper = MentionSweeper::new(&SweepConfig::default(), tracker(), transport);
        assert!(!sweeper.is_running().await);

        sweeper.start().await;
        assert!(sweeper.is_running().await);

        sweeper.stop().await;
        assert!(!sweeper.is_running().await);
    }

    #[test]
    fn test_health_tracking() {
        let transport: Arc<dyn ChatTransport> = Arc::new(MockChatTransport::new());
        let sweeper = MentionSweeper::new(&SweepConfig::default(), tracker(), transport);
        assert!(sweeper.is_healthy());
        sweeper.consecutive_failures.store(3, Ordering::Relaxed);
        assert!(!sweeper.is_healthy());
    }

    #[test]
    fn test_compose_notification_lists_chats() {
        let m = PendingMention {
            chat_id: "c1".into(),
            message_id: "10".into(),
            mentioner_id: "alice".into(),
            mentioned_id: "bob".into(),
            chat_title: Some("Ops".into()),
            excerpt: "ping?".into(),
            created_at: Utc::now(),
            status: MentionStatus::Unresponded,
        };
        let text = compose_notification(&[m]);
        assert!(text.contains("Ops"));
        assert!(text.contains("ping?"));
    }
}
