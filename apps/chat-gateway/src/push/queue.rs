//! Detached push path: a bounded queue drained by a background worker.
//!
//! The event engine only ever calls [`PushQueue::enqueue`], which never
//! waits. Recipient lookup and delivery happen on the worker side, one task
//! per batch with a fixed number of batches in flight. The worker stops
//! pulling jobs while every slot is busy, so a slow push provider fills the
//! queue and later jobs are dropped instead of piling up as tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use crate::db::store::ChatStore;
use crate::error::GatewayError;
use crate::models::member::Member;

use super::{PushDispatcher, PushNotification};

/// Android intent action attached to every chat notification.
pub const CLICK_ACTION: &str = "FLUTTER_NOTIFICATION_CLICK";

/// Upper bound on batches being delivered at once.
pub const MAX_CONCURRENT_BATCHES: usize = 8;

/// A notification request for one freshly persisted message.
#[derive(Debug, Clone)]
pub struct PushJob {
    pub room_id: String,
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
}

impl PushJob {
    pub fn notification(&self) -> PushNotification {
        let mut data = BTreeMap::new();
        data.insert("roomId".to_string(), self.room_id.clone());
        data.insert("messageId".to_string(), self.message_id.clone());
        data.insert("click_action".to_string(), CLICK_ACTION.to_string());
        PushNotification {
            title: self.sender_name.clone(),
            body: self.content.clone(),
            data,
        }
    }
}

/// Device tokens of every member except the sender. Members without a
/// registered token are skipped.
pub fn recipient_tokens(members: &[Member], sender_id: &str) -> Vec<String> {
    members
        .iter()
        .filter(|m| m.user_id != sender_id)
        .filter_map(|m| m.push_token.as_deref())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Handle to the push worker. Cheap to clone.
#[derive(Clone)]
pub struct PushQueue {
    tx: Option<mpsc::Sender<PushJob>>,
}

impl PushQueue {
    /// A queue that drops every job. Used when no push provider is configured.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the background worker and return a handle to its queue.
    ///
    /// At most `capacity` jobs wait in the queue and at most
    /// `min(capacity, MAX_CONCURRENT_BATCHES)` are delivered at once.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        store: Arc<dyn ChatStore>,
        dispatcher: Arc<dyn PushDispatcher>,
        capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let in_flight = capacity.min(MAX_CONCURRENT_BATCHES);
        tokio::spawn(run_worker(rx, store, dispatcher, in_flight));
        Self { tx: Some(tx) }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Hand a job to the worker without waiting. Returns `false` if the job
    /// was dropped because the queue is disabled, full, or stopped.
    pub fn enqueue(&self, job: PushJob) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    room_id = %job.room_id,
                    message_id = %job.message_id,
                    "push queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    room_id = %job.room_id,
                    message_id = %job.message_id,
                    "push worker stopped, dropping notification"
                );
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PushJob>,
    store: Arc<dyn ChatStore>,
    dispatcher: Arc<dyn PushDispatcher>,
    in_flight: usize,
) {
    let slots = Arc::new(Semaphore::new(in_flight));
    loop {
        // Take a slot before the job, so a stalled provider leaves jobs in
        // the bounded queue.
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let Some(job) = rx.recv().await else {
            break;
        };
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let message_id = job.message_id.clone();
            if let Err(err) = deliver_job(store.as_ref(), dispatcher.as_ref(), job).await {
                tracing::warn!(%message_id, error = %err, "push batch failed");
            }
        });
    }
    tracing::debug!("push worker stopped");
}

/// Resolve recipients for a job and deliver it. Returns the number of
/// devices that accepted the notification.
pub async fn deliver_job(
    store: &dyn ChatStore,
    dispatcher: &dyn PushDispatcher,
    job: PushJob,
) -> Result<usize, GatewayError> {
    let members = store
        .members_of(&job.room_id)
        .await
        .map_err(GatewayError::store("Failed to load room members"))?;

    let tokens = recipient_tokens(&members, &job.sender_id);
    if tokens.is_empty() {
        return Ok(0);
    }

    let outcomes = dispatcher.deliver(&tokens, &job.notification()).await?;

    let delivered = outcomes.iter().filter(|o| o.success).count();
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| o.token.as_str())
        .collect();

    tracing::info!(
        room_id = %job.room_id,
        message_id = %job.message_id,
        delivered,
        failed = failed.len(),
        "push batch sent"
    );
    if !failed.is_empty() {
        tracing::warn!(message_id = %job.message_id, tokens = ?failed, "push delivery failed for tokens");
    }

    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::memory::MemoryChatStore;
    use crate::push::testing::{BlockingDispatcher, RecordingDispatcher};

    fn member(user_id: &str, token: Option<&str>) -> Member {
        Member {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            push_token: token.map(str::to_string),
        }
    }

    fn job(room_id: &str, sender_id: &str) -> PushJob {
        job_for("msg_1", room_id, sender_id)
    }

    fn job_for(message_id: &str, room_id: &str, sender_id: &str) -> PushJob {
        PushJob {
            room_id: room_id.to_string(),
            message_id: message_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: "alice".to_string(),
            content: "hi".to_string(),
        }
    }

    #[test]
    fn recipients_exclude_sender_and_tokenless_members() {
        let members = vec![
            member("usr_a", Some("tok_a")),
            member("usr_b", Some("tok_b")),
            member("usr_c", None),
            member("usr_d", Some("")),
            member("usr_e", Some("tok_e")),
        ];
        assert_eq!(recipient_tokens(&members, "usr_a"), vec!["tok_b", "tok_e"]);
    }

    #[test]
    fn notification_carries_room_and_message() {
        let n = job("r1", "usr_a").notification();
        assert_eq!(n.title, "alice");
        assert_eq!(n.body, "hi");
        assert_eq!(n.data["roomId"], "r1");
        assert_eq!(n.data["messageId"], "msg_1");
        assert_eq!(n.data["click_action"], CLICK_ACTION);
    }

    #[tokio::test]
    async fn deliver_job_skips_dispatch_without_recipients() {
        let store = MemoryChatStore::new();
        store.add_user("usr_a", "alice", Some("tok_a"));
        store.add_user("usr_b", "bob", None);
        store.add_member("r1", "usr_a");
        store.add_member("r1", "usr_b");
        let (dispatcher, mut batches) = RecordingDispatcher::new();

        let delivered = deliver_job(&store, &dispatcher, job("r1", "usr_a")).await.unwrap();
        assert_eq!(delivered, 0);
        assert!(batches.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_job_counts_per_token_outcomes() {
        let store = MemoryChatStore::new();
        store.add_user("usr_a", "alice", None);
        store.add_user("usr_b", "bob", Some("tok_b"));
        store.add_user("usr_c", "carol", Some("bad_tok"));
        for u in ["usr_a", "usr_b", "usr_c"] {
            store.add_member("r1", u);
        }
        let (dispatcher, mut batches) = RecordingDispatcher::failing_tokens(&["bad_tok"]);

        let delivered = deliver_job(&store, &dispatcher, job("r1", "usr_a")).await.unwrap();
        assert_eq!(delivered, 1);
        let (tokens, _) = batches.try_recv().unwrap();
        assert_eq!(tokens, vec!["tok_b", "bad_tok"]);
    }

    #[tokio::test]
    async fn deliver_job_surfaces_dispatcher_errors() {
        let store = MemoryChatStore::new();
        store.add_user("usr_a", "alice", None);
        store.add_user("usr_b", "bob", Some("tok_b"));
        store.add_member("r1", "usr_a");
        store.add_member("r1", "usr_b");

        let result = deliver_job(&store, &RecordingDispatcher::broken(), job("r1", "usr_a")).await;
        assert!(matches!(result, Err(GatewayError::NotificationFailure(_))));
    }

    #[tokio::test]
    async fn spawned_worker_delivers_enqueued_jobs() {
        let store = Arc::new(MemoryChatStore::new());
        store.add_user("usr_a", "alice", None);
        store.add_user("usr_b", "bob", Some("tok_b"));
        store.add_member("r1", "usr_a");
        store.add_member("r1", "usr_b");
        let (dispatcher, mut batches) = RecordingDispatcher::new();

        let queue = PushQueue::spawn(store, Arc::new(dispatcher), 8);
        assert!(queue.is_enabled());
        assert!(queue.enqueue(job("r1", "usr_a")));

        let (tokens, notification) = tokio::time::timeout(Duration::from_secs(2), batches.recv())
            .await
            .expect("timeout waiting for push batch")
            .expect("dispatcher dropped");
        assert_eq!(tokens, vec!["tok_b"]);
        assert_eq!(notification.title, "alice");
    }

    async fn next_started(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn stalled_provider_fills_queue_and_drops_overflow() {
        let store = Arc::new(MemoryChatStore::new());
        store.add_user("usr_a", "alice", None);
        store.add_user("usr_b", "bob", Some("tok_b"));
        store.add_member("r1", "usr_a");
        store.add_member("r1", "usr_b");
        let (dispatcher, mut started) = BlockingDispatcher::new();
        let dispatcher = Arc::new(dispatcher);

        let queue = PushQueue::spawn(store, dispatcher.clone(), 1);

        // One batch in flight, one waiting, the rest dropped.
        assert!(queue.enqueue(job_for("msg_1", "r1", "usr_a")));
        assert_eq!(next_started(&mut started).await.as_deref(), Some("msg_1"));
        assert!(queue.enqueue(job_for("msg_2", "r1", "usr_a")));
        assert!(!queue.enqueue(job_for("msg_3", "r1", "usr_a")));
        assert!(!queue.enqueue(job_for("msg_4", "r1", "usr_a")));

        dispatcher.release();
        assert_eq!(next_started(&mut started).await.as_deref(), Some("msg_2"));
        assert!(tokio::time::timeout(Duration::from_millis(100), started.recv())
            .await
            .is_err());
    }

    #[test]
    fn disabled_queue_drops_jobs() {
        let queue = PushQueue::disabled();
        assert!(!queue.is_enabled());
        assert!(!queue.enqueue(job("r1", "usr_a")));
    }
}
