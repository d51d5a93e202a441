// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Watcher behaviour against an in-memory mailbox. Time is paused, so
//! poll, reconnect and refresh timers elapse instantly once the runtime idles.

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use alertmail::watcher::{ConnectionState, MailWatcher, WatcherConfig};

    use crate::common::{alert_email, CollectingHandler, FakeMailbox};

    fn config() -> WatcherConfig {
        WatcherConfig {
            subject_filter: "Motion".to_string(),
            ..WatcherConfig::default()
        }
    }

    /// Polls `cond` for up to five virtual minutes.
    async fn wait_until(cond: impl Fn() -> bool) -> bool {
        for _ in 0..600 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        cond()
    }

    async fn settle(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_unread_alert_delivered_once_and_marked_read() {
        let mailbox = FakeMailbox::new();
        let uid = mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "Camera Name: Porch", &["a.jpg"]));
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;

        assert!(wait_until(|| handler.count() == 1).await);
        assert!(mailbox.is_seen(uid));

        // Several fallback polls later the message is still not redelivered.
        settle(200).await;
        assert_eq!(handler.count(), 1);
        assert_eq!(watcher.state(), ConnectionState::IdleWatching);

        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_mail_while_watching_is_delivered() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());
        let mut states = watcher.subscribe();

        watcher.start(handler.clone()).await;
        tokio::time::timeout(
            Duration::from_secs(60),
            states.wait_for(|s| *s == ConnectionState::IdleWatching),
        )
        .await
        .unwrap()
        .unwrap();

        mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        assert!(wait_until(|| handler.count() == 1).await);

        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_poll_finds_mail_without_push() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        settle(1).await;
        mailbox.deliver_quietly("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));

        assert!(wait_until(|| handler.count() == 1).await);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subject_filter_leaves_other_mail_unread() {
        let mailbox = FakeMailbox::new();
        let alert = mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        let newsletter = mailbox.deliver("Weekly newsletter", alert_email("Weekly newsletter", "", &["b.jpg"]));
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| handler.count() == 1).await);

        assert!(mailbox.is_seen(alert));
        assert!(!mailbox.is_seen(newsletter));
        assert_eq!(handler.subjects(), vec!["Motion Alarm".to_string()]);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_and_imageless_mail_is_consumed_silently() {
        let mailbox = FakeMailbox::new();
        let cleared = mailbox.deliver("Motion Alarm Cleared", alert_email("Motion Alarm Cleared", "", &["a.jpg"]));
        let bare = mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "no picture", &[]));
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| mailbox.is_seen(cleared) && mailbox.is_seen(bare)).await);
        settle(120).await;

        assert_eq!(handler.count(), 0);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmarkable_message_is_not_delivered() {
        let mailbox = FakeMailbox::new();
        let stuck = mailbox.deliver("Motion Alarm 1", alert_email("Motion Alarm 1", "", &["a.jpg"]));
        mailbox.deliver("Motion Alarm 2", alert_email("Motion Alarm 2", "", &["a.jpg"]));
        mailbox.refuse_seen_for(stuck);
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| handler.count() == 1).await);
        settle(200).await;

        assert_eq!(handler.subjects(), vec!["Motion Alarm 2".to_string()]);
        assert!(!mailbox.is_seen(stuck));
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_handled_one_at_a_time_in_uid_order() {
        let mailbox = FakeMailbox::new();
        for n in 1..=3 {
            let subject = format!("Motion Alarm {}", n);
            mailbox.deliver(&subject, alert_email(&subject, "", &["a.jpg"]));
        }
        let handler = Arc::new(CollectingHandler {
            delay: Some(Duration::from_secs(5)),
            ..CollectingHandler::default()
        });
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| handler.count() == 3).await);

        assert_eq!(
            handler.subjects(),
            vec!["Motion Alarm 1", "Motion Alarm 2", "Motion Alarm 3"]
        );
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_retry_after_delay() {
        let mailbox = FakeMailbox::new();
        mailbox.fail_next_connects(2);
        mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        let started = tokio::time::Instant::now();
        watcher.start(handler.clone()).await;
        assert!(wait_until(|| handler.count() == 1).await);

        assert_eq!(mailbox.connects.load(Ordering::SeqCst), 3);
        // Two failed attempts, each followed by the ten second reconnect delay.
        assert!(started.elapsed() >= Duration::from_secs(20));
        assert_eq!(watcher.state(), ConnectionState::IdleWatching);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_connection_recovers_and_catches_up() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| watcher.state() == ConnectionState::IdleWatching).await);

        mailbox.drop_connections();
        mailbox.deliver_quietly("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));

        assert!(wait_until(|| handler.count() == 1).await);
        assert!(mailbox.connects.load(Ordering::SeqCst) >= 2);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_is_refreshed_periodically() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(
            Arc::new(mailbox.clone()),
            WatcherConfig {
                poll_interval: Duration::from_secs(60),
                refresh_interval: Duration::from_secs(120),
                ..config()
            },
        );

        watcher.start(handler).await;
        settle(250).await;

        assert!(mailbox.connects.load(Ordering::SeqCst) >= 3);
        assert!(mailbox.logouts.load(Ordering::SeqCst) >= 2);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_final() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        // Stopping before starting is harmless.
        watcher.stop().await;

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| watcher.state() == ConnectionState::IdleWatching).await);

        watcher.stop().await;
        watcher.stop().await;
        assert_eq!(watcher.state(), ConnectionState::Disconnected);
        assert!(mailbox.logouts.load(Ordering::SeqCst) >= 1);

        mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        settle(120).await;
        assert_eq!(handler.count(), 0);
        assert_eq!(mailbox.unseen_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_running_is_ignored() {
        let mailbox = FakeMailbox::new();
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler.clone()).await;
        assert!(wait_until(|| watcher.state() == ConnectionState::IdleWatching).await);
        watcher.start(handler).await;
        settle(5).await;

        assert_eq!(mailbox.connects.load(Ordering::SeqCst), 1);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_reconnect_wait() {
        let mailbox = FakeMailbox::new();
        mailbox.fail_next_connects(100);
        let handler = Arc::new(CollectingHandler::default());
        let watcher = MailWatcher::new(Arc::new(mailbox.clone()), config());

        watcher.start(handler).await;
        assert!(wait_until(|| watcher.state() == ConnectionState::ReconnectPending).await);

        watcher.stop().await;
        assert_eq!(watcher.state(), ConnectionState::Disconnected);
        let attempts = mailbox.connects.load(Ordering::SeqCst);
        settle(60).await;
        assert_eq!(mailbox.connects.load(Ordering::SeqCst), attempts);
    }
}
