//! End-to-end scenarios: a runtime driven through a host harness.

#[cfg(test)]
mod scenario_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::config::RuntimeConfig;
    use crate::correlator::Expect;
    use crate::envelope::{AppToHost, Envelope};
    use crate::error::{TetherError, ValidationError};
    use crate::model::{AppDataPatch, DataMap};
    use crate::registry::EventRegistry;
    use crate::runtime::{AppRuntime, LifecycleState};
    use crate::testing::{HostHarness, LogCapture};
    use crate::validate::validate_step;

    fn config() -> RuntimeConfig {
        RuntimeConfig::new("weather")
            .with_version("1.0.0")
            .with_request_timeout(Duration::from_millis(500))
            .with_fetch_timeout(Duration::from_millis(500))
    }

    fn data(value: Value) -> DataMap {
        value.as_object().cloned().unwrap()
    }

    // ==========================================================================
    // Correlation
    // ==========================================================================

    #[tokio::test]
    async fn two_waiters_resolve_once_on_duplicate_delivery() {
        let harness = HostHarness::start(config()).await;
        let registry = harness.runtime.registry().clone();

        let first = registry.once("weather", None);
        let second = registry.once("weather", None);

        harness.push(Envelope::new("weather", json!({ "n": 1 })));
        harness.push(Envelope::new("weather", json!({ "n": 2 })));

        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().payload, json!({ "n": 1 }));
        assert_eq!(second.unwrap().payload, json!({ "n": 1 }));

        harness.settle().await;
        assert_eq!(registry.handler_count("weather"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_timeout_restores_handler_baseline() {
        let harness = HostHarness::start(config()).await;
        let registry = harness.runtime.registry().clone();
        let baseline = registry.total_handlers();

        let payload = harness
            .runtime
            .fetch(
                AppToHost::Get {
                    request: "forecast".into(),
                    payload: Value::Null,
                },
                Some(Expect::kind("forecast")),
                Some(Duration::from_millis(300)),
            )
            .await;

        assert_eq!(payload, None);
        assert_eq!(registry.total_handlers(), baseline);
    }

    #[tokio::test]
    async fn handler_can_await_a_correlated_response() {
        let runtime = AppRuntime::new(config());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let rt = runtime.clone();
        runtime.on("message", move |_| {
            let rt = rt.clone();
            let tx = tx.clone();
            async move {
                let units = rt.get_config("units").await;
                let _ = tx.send(units);
                Ok(())
            }
        });

        let mut harness = HostHarness::start_with(runtime).await;
        harness.push(Envelope::new("message", json!("refresh")));

        let request = harness.expect_outbound("get").await.unwrap();
        assert_eq!(request.request.as_deref(), Some("config"));
        harness.push(Envelope::new("config", json!("metric")).with_request("units"));

        assert_eq!(rx.recv().await.unwrap(), Some(json!("metric")));
    }

    #[tokio::test]
    async fn get_data_is_answered_through_serve_loop() {
        let mut harness = HostHarness::start(config()).await;
        let runtime = harness.runtime.clone();

        let pending = tokio::spawn(async move { runtime.cache().get_data().await });

        let request = harness.expect_outbound("get").await.unwrap();
        assert_eq!(request.request.as_deref(), Some("data"));
        harness.push(Envelope::new("data", json!({ "city": "Tromsø" })));

        let fetched = pending.await.unwrap().unwrap();
        assert_eq!(fetched.get("city"), Some(&json!("Tromsø")));
    }

    // ==========================================================================
    // Cache and validation
    // ==========================================================================

    #[tokio::test]
    async fn repeated_setting_overwrites_instead_of_duplicating() {
        let harness = HostHarness::start(config()).await;
        let volume = json!({
            "id": "vol", "type": "range", "label": "Volume", "value": 50, "min": 0, "max": 100
        });

        harness.runtime.cache().add_settings(volume.clone(), true).await.unwrap();
        let batch = harness.runtime.cache().add_settings(volume, true).await.unwrap();

        assert_eq!(batch.overwritten, vec!["vol".to_string()]);
        assert_eq!(harness.runtime.cache().get_settings().await.unwrap().len(), 1);
    }

    #[test]
    fn setting_step_reference_and_inline_forms() {
        assert!(validate_step(&json!({
            "id": "s1", "type": "setting", "setting": { "id": "x" }
        }))
        .is_ok());

        assert!(validate_step(&json!({
            "id": "s1", "type": "setting", "setting": { "id": "missingLabel", "type": "boolean", "value": true }
        }))
        .is_err());
    }

    #[tokio::test]
    async fn save_data_merges_and_app_data_diverts_settings() {
        let harness = HostHarness::start(config()).await;
        let cache = harness.runtime.cache();

        cache.save_data(data(json!({ "foo": 1 })), true).await;
        cache.save_data(data(json!({ "bar": 2 })), true).await;
        let stored = cache.get_data().await.unwrap();
        assert!(stored.contains_key("foo") && stored.contains_key("bar"));

        cache
            .save_app_data(
                AppDataPatch {
                    settings: Some(json!({
                        "dark": { "type": "boolean", "label": "Dark mode", "value": true }
                    })),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert!(cache.get_setting("dark").is_some());

        let err = cache
            .save_app_data(
                AppDataPatch {
                    settings: Some(json!("dark")),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TetherError::Validation(ValidationError::Unclassifiable { .. })
        ));
    }

    #[tokio::test]
    async fn inbound_settings_update_cache_and_notify() {
        let runtime = AppRuntime::new(config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        runtime.on("settings", move |envelope| {
            let _ = tx.send(envelope.payload);
            async { Ok(()) }
        });

        let harness = HostHarness::start_with(runtime).await;
        harness.push(Envelope::new(
            "settings",
            json!({
                "units": { "id": "units", "type": "select", "label": "Units", "value": "metric",
                           "options": [{ "label": "Metric", "value": "metric" }] },
                "broken": { "id": "broken", "type": "select", "label": "Broken", "value": "x", "options": [] }
            }),
        ));

        rx.recv().await.unwrap();
        assert!(harness.runtime.cache().get_setting("units").is_some());
        assert!(harness.runtime.cache().get_setting("broken").is_none());
    }

    #[tokio::test]
    async fn settings_fetch_and_host_refresh_do_not_warn_about_overwrites() {
        let logs = LogCapture::install();
        let runtime = AppRuntime::new(config());
        let (tx, mut rx) = mpsc::unbounded_channel();
        runtime.on("settings", move |envelope| {
            let _ = tx.send(envelope.payload);
            async { Ok(()) }
        });

        let mut harness = HostHarness::start_with(runtime).await;
        let fetching = harness.runtime.clone();
        let pending = tokio::spawn(async move { fetching.cache().get_settings().await });

        let request = harness.expect_outbound("get").await.unwrap();
        assert_eq!(request.request.as_deref(), Some("settings"));
        let snapshot = json!({
            "vol": { "id": "vol", "type": "range", "label": "Volume", "value": 50, "min": 0, "max": 100 }
        });
        harness.push(Envelope::new("settings", snapshot.clone()));

        let fetched = pending.await.unwrap().unwrap();
        assert!(fetched.contains_key("vol"));
        rx.recv().await.unwrap();

        harness.push(Envelope::new("settings", snapshot));
        rx.recv().await.unwrap();
        assert_eq!(logs.count("overwriting existing setting"), 0);
    }

    // ==========================================================================
    // Scheduling and lifecycle
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn scheduled_unit_stops_on_third_call() {
        let harness = HostHarness::start(config()).await;
        let calls = Arc::new(AtomicUsize::new(0));

        let c = calls.clone();
        harness.runtime.schedule(
            move || {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1 == 3) }
            },
            Some(Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn inbound_stop_and_start_drive_lifecycle() {
        let mut harness = HostHarness::start(config()).await;
        let start = harness.expect_outbound("lifecycle").await.unwrap();
        assert_eq!(start.request.as_deref(), Some("start"));

        harness.push(Envelope::new("stop", Value::Null));
        let stop = harness.expect_outbound("lifecycle").await.unwrap();
        assert_eq!(stop.request.as_deref(), Some("stop"));
        assert_eq!(harness.runtime.state(), LifecycleState::Stopped);
        assert!(harness.runtime.is_stop_requested());

        harness.push(Envelope::new("start", Value::Null));
        let restart = harness.expect_outbound("lifecycle").await.unwrap();
        assert_eq!(restart.request.as_deref(), Some("start"));
        assert!(!harness.runtime.is_stop_requested());
    }

    #[tokio::test]
    async fn purge_starts_from_empty_subscriptions() {
        let runtime = AppRuntime::new(config());
        let stale = Arc::new(AtomicUsize::new(0));
        let s = stale.clone();
        runtime.on("weather", move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        let harness = HostHarness::start_with(runtime.clone()).await;
        assert!(runtime.purge().await);
        assert_eq!(runtime.state(), LifecycleState::Purged);

        let (tx, mut rx) = mpsc::unbounded_channel();
        runtime.on("weather", move |envelope| {
            let _ = tx.send(envelope.payload);
            async { Ok(()) }
        });
        harness.push(Envelope::new("weather", json!("sunny")));

        assert_eq!(rx.recv().await.unwrap(), json!("sunny"));
        assert_eq!(stale.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.registry().handler_count("weather"), 1);
    }

    // ==========================================================================
    // Stress
    // ==========================================================================

    #[tokio::test]
    async fn stress_shuffled_duplicate_deliveries() {
        let mut rng = fastrand::Rng::with_seed(7);
        let registry = Arc::new(EventRegistry::new());
        let requests = ["data", "settings", "config"];

        let mut waiters = Vec::new();
        for _ in 0..200 {
            let request = requests[rng.usize(..requests.len())];
            waiters.push((request, registry.once("get", Some(request.to_string()))));
        }

        let mut deliveries = Vec::new();
        for request in requests {
            for _ in 0..rng.usize(1..4) {
                deliveries.push(request);
            }
        }
        rng.shuffle(&mut deliveries);

        for request in deliveries {
            registry
                .notify(&Envelope::new("get", json!(request)).with_request(request))
                .await;
        }

        for (request, waiter) in waiters {
            let envelope = waiter.await.expect("every waiter should resolve");
            assert_eq!(envelope.request.as_deref(), Some(request));
        }
        assert_eq!(registry.handler_count("get"), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stress_concurrent_notifiers_resolve_each_waiter_once() {
        let registry = Arc::new(EventRegistry::new());
        let resolved = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..100 {
            let waiter = registry.once("tick", None);
            let resolved = resolved.clone();
            waiters.push(tokio::spawn(async move {
                if waiter.await.is_some() {
                    resolved.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        let notifiers: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry.notify(&Envelope::new("tick", json!(i))).await;
                })
            })
            .collect();

        for handle in notifiers {
            handle.await.unwrap();
        }
        for handle in waiters {
            handle.await.unwrap();
        }

        assert_eq!(resolved.load(Ordering::SeqCst), 100);
        assert_eq!(registry.handler_count("tick"), 0);
    }
}
