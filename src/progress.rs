//! Progress event bus
//!
//! One mailbox per job id. The pipeline publishes stage events into the
//! mailbox and any number of subscribers read them back in publish order
//! until the terminator arrives. Each subscription replays the mailbox from
//! its first event, so a subscriber may connect before or after the job
//! starts.
//!
//! Job ids must be unique per in-flight job. Reusing an id while an earlier
//! run with that id is still publishing interleaves the two runs' events.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "transcribe")]
    Transcribe,
    #[serde(rename = "detect")]
    Detect,
    #[serde(rename = "gif")]
    Render,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Audio, Stage::Transcribe, Stage::Detect, Stage::Render];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Audio => "audio",
            Stage::Transcribe => "transcribe",
            Stage::Detect => "detect",
            Stage::Render => "gif",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one stage, 0.0 to 100.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "step")]
    pub stage: Stage,
    pub progress: f64,
}

impl ProgressEvent {
    /// Progress is clamped to 0..=100 and rounded to two decimals.
    pub fn new(stage: Stage, progress: f64) -> Self {
        let progress = if progress.is_finite() {
            (progress.clamp(0.0, 100.0) * 100.0).round() / 100.0
        } else {
            0.0
        };
        Self { stage, progress }
    }

    pub fn started(stage: Stage) -> Self {
        Self::new(stage, 0.0)
    }

    pub fn finished(stage: Stage) -> Self {
        Self::new(stage, 100.0)
    }
}

/// What a publisher can put into a mailbox
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Message {
    Progress(ProgressEvent),
    /// No further events will follow. Never delivered to subscribers.
    Terminator,
}

impl From<ProgressEvent> for Message {
    fn from(event: ProgressEvent) -> Self {
        Message::Progress(event)
    }
}

#[derive(Debug, Default)]
struct MailboxLog {
    events: Vec<ProgressEvent>,
    closed: bool,
}

#[derive(Debug)]
struct Mailbox {
    log: watch::Sender<MailboxLog>,
    subscribers: AtomicUsize,
}

impl Mailbox {
    fn new() -> Self {
        let (log, _) = watch::channel(MailboxLog::default());
        Self {
            log,
            subscribers: AtomicUsize::new(0),
        }
    }

    /// Returns false if the mailbox was already closed.
    fn push(&self, message: Message) -> bool {
        let mut accepted = true;
        self.log.send_modify(|log| {
            if log.closed {
                accepted = false;
                return;
            }
            match message {
                Message::Progress(event) => log.events.push(event),
                Message::Terminator => log.closed = true,
            }
        });
        accepted
    }
}

/// Handle returned by [`ProgressBus::open`]
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    job_id: String,
    mailbox: Arc<Mailbox>,
}

impl ChannelHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Number of progress events published so far
    pub fn published(&self) -> usize {
        self.mailbox.log.borrow().events.len()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.log.borrow().closed
    }

    pub fn subscribers(&self) -> usize {
        self.mailbox.subscribers.load(Ordering::Acquire)
    }
}

/// Registry of per-job mailboxes. Cheap to clone; clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct ProgressBus {
    mailboxes: Arc<DashMap<String, Arc<Mailbox>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the mailbox for `job_id`, or return the existing one.
    pub fn open(&self, job_id: &str) -> ChannelHandle {
        let mailbox = self
            .mailboxes
            .entry(job_id.to_string())
            .or_insert_with(|| {
                debug!("📬 Opened progress mailbox for job {}", job_id);
                Arc::new(Mailbox::new())
            })
            .value()
            .clone();

        ChannelHandle {
            job_id: job_id.to_string(),
            mailbox,
        }
    }

    /// Open the mailbox for a new run of `job_id`.
    ///
    /// Same as [`open`](Self::open), except that a mailbox already closed by
    /// an earlier run with this id is replaced. Subscriptions still attached
    /// to the old mailbox finish reading its log; new subscriptions see only
    /// the new run.
    pub fn open_run(&self, job_id: &str) -> ChannelHandle {
        let mailbox = match self.mailboxes.entry(job_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().log.borrow().closed {
                    debug!("♻️  Replacing closed progress mailbox for job {}", job_id);
                    entry.insert(Arc::new(Mailbox::new()));
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                debug!("📬 Opened progress mailbox for job {}", job_id);
                entry.insert(Arc::new(Mailbox::new())).value().clone()
            }
        };

        ChannelHandle {
            job_id: job_id.to_string(),
            mailbox,
        }
    }

    /// Append to the job's mailbox. Never blocks.
    ///
    /// Messages for a job without a mailbox (never opened, or already torn
    /// down because its subscriber left) are dropped.
    pub fn publish(&self, job_id: &str, message: impl Into<Message>) {
        let message = message.into();
        let mailbox = match self.mailboxes.get(job_id) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!("No progress mailbox for job {}, dropping {:?}", job_id, message);
                return;
            }
        };

        if !mailbox.push(message) {
            debug!("Progress mailbox for job {} is closed, dropping {:?}", job_id, message);
            return;
        }
        trace!("Published {:?} for job {}", message, job_id);
    }

    /// Publish the terminator for `job_id`
    pub fn close(&self, job_id: &str) {
        self.publish(job_id, Message::Terminator);
    }

    /// Subscribe to `job_id`, creating its mailbox if needed.
    pub fn consume(&self, job_id: &str) -> Subscription {
        // The count is bumped while the shard lock is held so a concurrent
        // release cannot remove the mailbox underneath us.
        let mailbox = {
            let entry = self
                .mailboxes
                .entry(job_id.to_string())
                .or_insert_with(|| Arc::new(Mailbox::new()));
            entry.subscribers.fetch_add(1, Ordering::AcqRel);
            entry.value().clone()
        };

        debug!("👂 New progress subscription for job {}", job_id);
        Subscription {
            job_id: job_id.to_string(),
            receiver: mailbox.log.subscribe(),
            mailbox,
            registry: Arc::clone(&self.mailboxes),
            cursor: 0,
            finished: false,
        }
    }

    /// Drop the job's mailbox once its run has closed it and nobody is
    /// subscribed to it. A mailbox still being published to is kept.
    pub fn release(&self, job_id: &str) -> bool {
        let removed = self
            .mailboxes
            .remove_if(job_id, |_, mailbox| {
                mailbox.subscribers.load(Ordering::Acquire) == 0 && mailbox.log.borrow().closed
            })
            .is_some();
        if removed {
            debug!("🧹 Released progress mailbox for job {}", job_id);
        }
        removed
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.mailboxes.contains_key(job_id)
    }

    /// Number of live mailboxes
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }
}

/// Forward-only reader over one job's mailbox.
///
/// Dropping a subscription (for example when an HTTP client disconnects)
/// releases the mailbox once no other subscription is attached. The
/// publisher is unaffected; its later messages are dropped by the bus.
#[derive(Debug)]
pub struct Subscription {
    job_id: String,
    receiver: watch::Receiver<MailboxLog>,
    mailbox: Arc<Mailbox>,
    registry: Arc<DashMap<String, Arc<Mailbox>>>,
    cursor: usize,
    finished: bool,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Next event in publish order, waiting while the mailbox is empty.
    /// Returns `None` once the terminator has been reached.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        loop {
            {
                let log = self.receiver.borrow_and_update();
                if let Some(event) = log.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(*event);
                }
                if log.closed {
                    self.finished = true;
                    return None;
                }
            }

            if self.receiver.changed().await.is_err() {
                self.finished = true;
                return None;
            }
        }
    }

    /// True once the terminator has been consumed
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self.mailbox.subscribers.fetch_sub(1, Ordering::AcqRel) - 1;
        if !self.finished {
            debug!("Progress subscription for job {} dropped before completion", self.job_id);
        }
        if remaining > 0 {
            return;
        }

        let mailbox = &self.mailbox;
        let removed = self
            .registry
            .remove_if(&self.job_id, |_, current| {
                Arc::ptr_eq(current, mailbox) && current.subscribers.load(Ordering::Acquire) == 0
            })
            .is_some();
        if removed {
            debug!("🧹 Released progress mailbox for job {}", self.job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn publish_all(bus: &ProgressBus, job_id: &str) {
        for stage in Stage::ALL {
            bus.publish(job_id, ProgressEvent::started(stage));
            bus.publish(job_id, ProgressEvent::finished(stage));
        }
        bus.close(job_id);
    }

    #[test]
    fn test_progress_event_wire_format() {
        let json = serde_json::to_value(ProgressEvent::started(Stage::Render)).unwrap();
        assert_eq!(json, serde_json::json!({"step": "gif", "progress": 0.0}));
    }

    #[test]
    fn test_progress_is_clamped_and_rounded() {
        assert_eq!(ProgressEvent::new(Stage::Audio, 150.0).progress, 100.0);
        assert_eq!(ProgressEvent::new(Stage::Audio, -3.0).progress, 0.0);
        assert_eq!(ProgressEvent::new(Stage::Audio, 33.3333).progress, 33.33);
        assert_eq!(ProgressEvent::new(Stage::Audio, f64::NAN).progress, 0.0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        let subscription = bus.consume("job-1");
        publish_all(&bus, "job-1");

        let received: Vec<_> = subscription.into_stream().collect().await;
        let expected: Vec<_> = Stage::ALL
            .iter()
            .flat_map(|s| [ProgressEvent::started(*s), ProgressEvent::finished(*s)])
            .collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_subscriber_waits_for_publisher() {
        let bus = ProgressBus::new();
        let mut subscription = bus.consume("job-1");

        let publisher = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("job-1", ProgressEvent::started(Stage::Audio));
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.close("job-1");
        });

        assert_eq!(subscription.next().await, Some(ProgressEvent::started(Stage::Audio)));
        assert_eq!(subscription.next().await, None);
        assert!(subscription.is_finished());
        assert_eq!(subscription.next().await, None);
        handle.await.unwrap();
    }

    #[test]
    fn test_empty_mailbox_suspends_until_publish() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let bus = ProgressBus::new();
        let mut subscription = bus.consume("job-1");
        let mut next = task::spawn(subscription.next());

        assert_pending!(next.poll());
        bus.publish("job-1", ProgressEvent::started(Stage::Transcribe));
        assert!(next.is_woken());
        assert_ready_eq!(next.poll(), Some(ProgressEvent::started(Stage::Transcribe)));
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_from_start() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        publish_all(&bus, "job-1");

        let received: Vec<_> = bus.consume("job-1").into_stream().collect().await;
        assert_eq!(received.len(), 8);
        assert_eq!(received[0], ProgressEvent::started(Stage::Audio));
    }

    #[tokio::test]
    async fn test_mailbox_released_after_terminal_consumption() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        publish_all(&bus, "job-1");

        let _: Vec<_> = bus.consume("job-1").into_stream().collect().await;
        assert!(!bus.contains("job-1"));
    }

    #[tokio::test]
    async fn test_abandoned_subscription_releases_mailbox() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        let mut subscription = bus.consume("job-1");
        bus.publish("job-1", ProgressEvent::started(Stage::Audio));
        assert!(subscription.next().await.is_some());

        drop(subscription);
        assert!(!bus.contains("job-1"));

        // Publisher keeps going; messages are dropped without recreating the mailbox
        bus.publish("job-1", ProgressEvent::finished(Stage::Audio));
        bus.close("job-1");
        assert!(!bus.contains("job-1"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_see_everything() {
        let bus = ProgressBus::new();
        let first = bus.consume("job-1");
        let second = bus.consume("job-1");
        assert_eq!(bus.open("job-1").subscribers(), 2);

        publish_all(&bus, "job-1");

        let (a, b) = tokio::join!(
            first.into_stream().collect::<Vec<_>>(),
            second.into_stream().collect::<Vec<_>>()
        );
        assert_eq!(a.len(), 8);
        assert_eq!(a, b);
        assert!(!bus.contains("job-1"));
    }

    #[tokio::test]
    async fn test_jobs_are_isolated() {
        let bus = ProgressBus::new();
        bus.open("job-a");
        bus.open("job-b");
        let sub_b = bus.consume("job-b");

        bus.publish("job-a", ProgressEvent::started(Stage::Audio));
        bus.close("job-a");
        bus.publish("job-b", ProgressEvent::started(Stage::Detect));
        bus.close("job-b");

        let received: Vec<_> = sub_b.into_stream().collect().await;
        assert_eq!(received, vec![ProgressEvent::started(Stage::Detect)]);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_mailbox() {
        let bus = ProgressBus::new();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let bus = bus.clone();
            handles.push(tokio::spawn(async move { bus.open("shared") }));
        }
        let channels: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|h| h.unwrap())
            .collect();

        assert_eq!(bus.len(), 1);
        bus.publish("shared", ProgressEvent::started(Stage::Audio));
        assert!(channels.iter().all(|c| c.published() == 1));
    }

    #[test]
    fn test_publish_after_terminator_is_ignored() {
        let bus = ProgressBus::new();
        let channel = bus.open("job-1");
        bus.publish("job-1", ProgressEvent::started(Stage::Audio));
        bus.close("job-1");
        bus.publish("job-1", ProgressEvent::finished(Stage::Audio));

        assert!(channel.is_closed());
        assert_eq!(channel.published(), 1);
    }

    #[tokio::test]
    async fn test_open_run_replaces_a_closed_mailbox() {
        let bus = ProgressBus::new();
        bus.open_run("job-1");
        publish_all(&bus, "job-1");

        // A reader of the first run that is still draining
        let mut stale = bus.consume("job-1");
        assert_eq!(stale.next().await, Some(ProgressEvent::started(Stage::Audio)));

        let second = bus.open_run("job-1");
        assert!(!second.is_closed());
        assert_eq!(second.published(), 0);

        bus.publish("job-1", ProgressEvent::started(Stage::Detect));
        bus.close("job-1");

        let rest: Vec<_> = stale.into_stream().collect().await;
        assert_eq!(rest.len(), 7);
        assert!(bus.contains("job-1"));

        let fresh: Vec<_> = bus.consume("job-1").into_stream().collect().await;
        assert_eq!(fresh, vec![ProgressEvent::started(Stage::Detect)]);
    }

    #[test]
    fn test_open_run_keeps_an_open_mailbox() {
        let bus = ProgressBus::new();
        let first = bus.open_run("job-1");
        bus.publish("job-1", ProgressEvent::started(Stage::Audio));

        let again = bus.open_run("job-1");
        assert_eq!(again.published(), 1);
        assert_eq!(first.published(), 1);
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_release_skips_subscribed_mailboxes() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        let subscription = bus.consume("job-1");
        bus.close("job-1");
        assert!(!bus.release("job-1"));
        drop(subscription);
        assert!(bus.is_empty());

        bus.open("job-2");
        bus.close("job-2");
        assert!(bus.release("job-2"));
        assert!(!bus.contains("job-2"));
    }

    #[test]
    fn test_release_keeps_a_mailbox_still_being_published_to() {
        let bus = ProgressBus::new();
        bus.open("job-1");
        bus.close("job-1");

        // A rerun took over the id before the first run's release fired
        let rerun = bus.open_run("job-1");
        assert!(!rerun.is_closed());
        assert!(!bus.release("job-1"));
        assert!(bus.contains("job-1"));

        bus.close("job-1");
        assert!(bus.release("job-1"));
    }
}
