use std::time::Duration;

use anyhow::bail;
use rumqttc::QoS;
use thermonode_common::TopicSet;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::link::{Connectivity, Link, LinkError};

/// Re-establishes the command subscriptions on every new link session.
/// A fresh session carries no subscriptions, so the whole set is replayed
/// rather than diffed.
pub struct LinkSupervisor<L> {
    link: L,
    topics: TopicSet,
    qos: QoS,
    subscribe_delay: Duration,
}

impl<L: Link> LinkSupervisor<L> {
    pub fn new(link: L, topics: TopicSet, qos: QoS, subscribe_delay: Duration) -> Self {
        Self {
            link,
            topics,
            qos,
            subscribe_delay,
        }
    }

    pub async fn subscribe_all(&self) -> Result<(), LinkError> {
        for (index, topic) in self.topics.subscriptions().enumerate() {
            if index > 0 && !self.subscribe_delay.is_zero() {
                tokio::time::sleep(self.subscribe_delay).await;
            }
            self.link.subscribe(topic, self.qos).await?;
            info!("subscribed to {topic}");
        }
        Ok(())
    }

    pub async fn run(self, mut connectivity: watch::Receiver<Connectivity>) -> anyhow::Result<()> {
        let mut subscribed_session = None;

        loop {
            let state = *connectivity.borrow_and_update();
            if state.up && subscribed_session != Some(state.session) {
                match self.subscribe_all().await {
                    Ok(()) => subscribed_session = Some(state.session),
                    Err(err) => warn!("resubscription for session {} failed: {err}", state.session),
                }
            }

            if connectivity.changed().await.is_err() {
                bail!("link connectivity channel closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use thermonode_common::{DeviceId, TopicNames};
    use tokio::time::Instant;

    use super::*;
    use crate::testing::RecordingLink;

    fn supervisor(link: &RecordingLink) -> LinkSupervisor<RecordingLink> {
        let topics = TopicSet::new(&DeviceId::new("A1B2C3").unwrap(), &TopicNames::default());
        LinkSupervisor::new(
            link.clone(),
            topics,
            QoS::AtLeastOnce,
            Duration::from_millis(500),
        )
    }

    fn up(session: u64) -> Connectivity {
        Connectivity { up: true, session }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_all_paces_the_fixed_set() {
        let link = RecordingLink::new(true);
        let started = Instant::now();

        supervisor(&link).subscribe_all().await.unwrap();

        let topics: Vec<_> = link.subscribed().into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            topics,
            vec![
                "A1B2C3/setpoint",
                "A1B2C3/period",
                "A1B2C3/mode",
                "A1B2C3/relay",
                "A1B2C3/blink",
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(2_000));
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_each_reconnect() {
        let link = RecordingLink::new(true);
        let (tx, rx) = watch::channel(Connectivity::default());
        let task = tokio::spawn(supervisor(&link).run(rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(link.subscribed().is_empty());

        let first_up = Instant::now();
        tx.send_replace(up(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send_modify(|state| state.up = false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        let second_up = Instant::now();
        tx.send_replace(up(2));
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();

        let subscribed = link.subscribed();
        assert_eq!(subscribed.len(), 10);
        for (_, at) in &subscribed[..5] {
            assert!(*at - first_up <= Duration::from_secs(3));
        }
        for (_, at) in &subscribed[5..] {
            assert!(*at >= second_up);
            assert!(*at - second_up <= Duration::from_secs(3));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_reconnect_is_not_missed() {
        let link = RecordingLink::new(true);
        let (tx, rx) = watch::channel(up(1));
        let task = tokio::spawn(supervisor(&link).run(rx));
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Down and up again before the supervisor looks.
        tx.send_modify(|state| state.up = false);
        tx.send_replace(up(2));
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();

        assert_eq!(link.subscribed().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_up_notifications_subscribe_once() {
        let link = RecordingLink::new(true);
        let (tx, rx) = watch::channel(up(1));
        let task = tokio::spawn(supervisor(&link).run(rx));
        tokio::time::sleep(Duration::from_secs(5)).await;

        tx.send_replace(up(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        task.abort();

        assert_eq!(link.subscribed().len(), 5);
    }

    #[tokio::test]
    async fn closed_channel_ends_the_task() {
        let link = RecordingLink::new(true);
        let (tx, rx) = watch::channel(Connectivity::default());
        drop(tx);

        assert!(supervisor(&link).run(rx).await.is_err());
    }
}
