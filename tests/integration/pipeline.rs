// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mailbox to notifier, with the analysis providers served by mockito.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use alertmail::analysis::{AnalysisCoordinator, ChatVisionProvider, DetectorProvider, ProviderStrategy};
    use alertmail::credentials::{fingerprint, CredentialPool, MemoryQuotaStore, QuotaPolicy};
    use alertmail::dispatcher::Dispatcher;
    use alertmail::filter::{FilterConfig, SharedFilter};
    use alertmail::watcher::{MailWatcher, WatcherConfig};
    use mockito::Matcher;
    use serde_json::json;

    use crate::common::{alert_email, FakeMailbox, RecordingNotifier};

    struct Pipeline {
        watcher: MailWatcher,
        dispatcher: Arc<Dispatcher>,
        pool: Arc<CredentialPool>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Pipeline {
        async fn start(&self) {
            self.watcher.start(self.dispatcher.clone()).await;
        }
    }

    fn pipeline(mailbox: &FakeMailbox, strategies: Vec<ProviderStrategy>, keys: &[&str], ai_enabled: bool) -> Pipeline {
        let notifier = Arc::new(RecordingNotifier::new());
        let policy = QuotaPolicy {
            daily_quota: 100,
            cooldown: Duration::ZERO,
            ..QuotaPolicy::default()
        };
        let pool = Arc::new(CredentialPool::new(
            keys.iter().map(|k| k.to_string()).collect(),
            policy,
            Arc::new(MemoryQuotaStore::new()),
            notifier.clone(),
        ));
        let coordinator = Arc::new(AnalysisCoordinator::new(strategies, pool.clone()));
        let filter = SharedFilter::new(FilterConfig::default(), ai_enabled);
        let dispatcher = Arc::new(Dispatcher::new(filter, coordinator, notifier.clone()));

        let watcher = MailWatcher::new(
            Arc::new(mailbox.clone()),
            WatcherConfig {
                subject_filter: "Motion".to_string(),
                poll_interval: Duration::from_millis(200),
                ..WatcherConfig::default()
            },
        );
        Pipeline {
            watcher,
            dispatcher,
            pool,
            notifier,
        }
    }

    fn chat_reply(content: &str) -> String {
        json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }).to_string()
    }

    /// Real-time wait; the HTTP mocks run outside the test runtime.
    async fn wait_until(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cond()
    }

    fn chat(server: &mockito::Server, model: &str) -> Arc<ChatVisionProvider> {
        Arc::new(ChatVisionProvider::new(reqwest::Client::new(), server.url(), model))
    }

    #[tokio::test]
    async fn test_forwarded_without_analysis_uses_subject() {
        let mailbox = FakeMailbox::new();
        mailbox.deliver("Camera 3 Motion", alert_email("Camera 3 Motion", "", &["snap.jpg"]));
        let p = pipeline(&mailbox, Vec::new(), &[], false);

        p.start().await;
        assert!(wait_until(|| p.notifier.alerts().len() == 1).await);
        p.watcher.stop().await;

        let alert = &p.notifier.alerts()[0];
        assert_eq!(alert.camera, "Camera 3 Motion");
        assert_eq!(alert.description, "Camera 3 Motion");
        assert_eq!(alert.confidence, None);
        assert_eq!(alert.image.filename, "snap.jpg");
        assert_eq!(mailbox.unseen_count(), 0);
    }

    #[tokio::test]
    async fn test_analyzed_alert_is_delivered_with_confidence() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-pipeline")
            .match_body(Matcher::PartialJson(json!({ "model": "vision-mini" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply(
                r#"{"shouldAlert": true, "description": "Person at the side door", "confidence": 88}"#,
            ))
            .expect(1)
            .create_async()
            .await;

        let mailbox = FakeMailbox::new();
        mailbox.deliver(
            "Motion Alarm",
            alert_email("Motion Alarm", "Camera Name: Side Door", &["b.jpg", "a.jpg"]),
        );
        let p = pipeline(
            &mailbox,
            vec![ProviderStrategy::pooled(chat(&server, "vision-mini"))],
            &["sk-pipeline"],
            true,
        );

        p.start().await;
        assert!(wait_until(|| p.notifier.alerts().len() == 1).await);
        p.watcher.stop().await;

        let alert = &p.notifier.alerts()[0];
        assert_eq!(alert.camera, "Side Door");
        assert_eq!(alert.description, "Person at the side door");
        assert_eq!(alert.confidence, Some(88));
        assert_eq!(alert.image.filename, "a.jpg");
        assert_eq!(p.pool.usage().await[0].usage_count, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_model_fails_over_to_next_key() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({ "model": "model-a" })))
            .with_status(429)
            .with_body(r#"{"error":{"message":"quota exceeded"}}"#)
            .expect(1)
            .create_async()
            .await;
        let healthy = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-second")
            .match_body(Matcher::PartialJson(json!({ "model": "model-b" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply(
                r#"{"shouldAlert": true, "description": "Vehicle in driveway", "confidence": 0.9}"#,
            ))
            .expect(1)
            .create_async()
            .await;

        let mailbox = FakeMailbox::new();
        mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        let p = pipeline(
            &mailbox,
            vec![
                ProviderStrategy::pooled(chat(&server, "model-a")),
                ProviderStrategy::pooled(chat(&server, "model-b")),
            ],
            &["sk-first", "sk-second"],
            true,
        );

        p.start().await;
        assert!(wait_until(|| p.notifier.alerts().len() == 1).await);
        p.watcher.stop().await;

        assert_eq!(p.notifier.alerts()[0].confidence, Some(90));
        let usage = p.pool.usage().await;
        assert!(usage[0].exhausted);
        assert_eq!(usage[1].usage_count, 1);

        let notices = p.notifier.admin_texts();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains(&fingerprint("sk-first")));
        assert!(!notices[0].contains("sk-first"));

        limited.assert_async().await;
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn test_detector_sees_every_frame_and_tuning() {
        let mut server = mockito::Server::new_async().await;
        let detect = server
            .mock("POST", "/detect")
            .match_header("authorization", "Bearer detector-secret")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(json!({ "camera_name": "Garage", "vehicle_iou_threshold": 0.9 })),
                Matcher::Regex(r#""images":\["[^"]+","[^"]+","[^"]+"\]"#.to_string()),
            ]))
            .with_status(200)
            .with_body(r#"{"shouldAlert":true,"description":"Person near garage","confidence":77.4,"detectedObjects":["person"]}"#)
            .expect(1)
            .create_async()
            .await;

        let mailbox = FakeMailbox::new();
        mailbox.deliver(
            "Motion Alarm",
            alert_email("Motion Alarm", "Camera Name: Garage", &["1.jpg", "2.jpg", "3.jpg"]),
        );
        let detector = Arc::new(DetectorProvider::new(reqwest::Client::new(), server.url()));
        let p = pipeline(
            &mailbox,
            vec![ProviderStrategy::fixed(detector, "detector-secret")],
            &[],
            true,
        );

        p.start().await;
        assert!(wait_until(|| p.notifier.alerts().len() == 1).await);
        p.watcher.stop().await;

        let alert = &p.notifier.alerts()[0];
        assert_eq!(alert.description, "Person near garage");
        assert_eq!(alert.confidence, Some(77));
        detect.assert_async().await;
    }

    #[tokio::test]
    async fn test_low_confidence_is_consumed_without_alert() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_reply(r#"{"shouldAlert": true, "description": "Maybe a cat", "confidence": 35}"#))
            .expect(1)
            .create_async()
            .await;

        let mailbox = FakeMailbox::new();
        let uid = mailbox.deliver("Motion Alarm", alert_email("Motion Alarm", "", &["a.jpg"]));
        let p = pipeline(
            &mailbox,
            vec![ProviderStrategy::pooled(chat(&server, "vision-mini"))],
            &["sk-only"],
            true,
        );

        p.start().await;
        assert!(wait_until(|| mailbox.is_seen(uid)).await);
        // Stopping waits for the in-flight handler to finish.
        p.watcher.stop().await;

        assert!(p.notifier.alerts().is_empty());
        assert_eq!(p.pool.usage().await[0].usage_count, 1);
        mock.assert_async().await;
    }
}
