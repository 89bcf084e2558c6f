//! # Dispatch Flows
//!
//! End-to-end delivery through publisher, in-memory transport and
//! dispatcher: retry budgets, fan-out to multiple handlers, isolation of slow
//! handlers and resilience against hostile input.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{
        broker_config, registry, wait_for, InventorySnapshot, OrderPlaced, ShipOrder,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use mesh_bus::{
        handler_fn, BrokerConfig, Dispatcher, DispatcherState, HandlerError, InMemoryTransport,
        MessageContext, MessageHandler, Publisher, RetryPolicy, Transport,
    };
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn order(id: &str) -> OrderPlaced {
        OrderPlaced {
            order_id: id.to_string(),
        }
    }

    /// Records `(order_id, retry_count)` per attempt; fails the first `failures`.
    struct Recorder {
        failures: usize,
        attempts: Mutex<Vec<(String, u32)>>,
    }

    impl Recorder {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<(String, u32)> {
            self.attempts.lock().clone()
        }

        fn retry_counts(&self) -> Vec<u32> {
            self.attempts.lock().iter().map(|(_, n)| *n).collect()
        }
    }

    #[async_trait]
    impl MessageHandler<OrderPlaced> for Recorder {
        async fn handle(&self, message: &OrderPlaced, context: &MessageContext) -> Result<(), HandlerError> {
            let seen = {
                let mut attempts = self.attempts.lock();
                attempts.push((message.order_id.clone(), context.retry_count()));
                attempts.len()
            };
            if seen <= self.failures {
                Err(HandlerError::failed("transient"))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        transport: Arc<InMemoryTransport>,
        publisher: Publisher,
        dispatcher: Dispatcher,
    }

    impl Harness {
        async fn start(
            config: BrokerConfig,
            build: impl FnOnce(mesh_bus::DispatcherBuilder) -> mesh_bus::DispatcherBuilder,
        ) -> Self {
            let transport = Arc::new(InMemoryTransport::new());
            let reg = registry();
            let builder = Dispatcher::builder(reg.clone(), transport.clone())
                .config(config)
                .channel("orders");
            let dispatcher = build(builder).build().unwrap();
            dispatcher.start().await.unwrap();
            let publisher =
                Publisher::from_config(reg, transport.clone(), &broker_config("orders-api"));
            Self {
                transport,
                publisher,
                dispatcher,
            }
        }
    }

    // =============================================================================
    // SINGLE DELIVERY
    // =============================================================================

    #[tokio::test]
    async fn test_order_placed_reaches_handler_once() {
        let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let harness = Harness::start(broker_config("fulfilment"), |b| {
            b.handler::<OrderPlaced, _>(handler_fn(move |placed: OrderPlaced, ctx: MessageContext| {
                sink.lock()
                    .push((placed.order_id, ctx.header().source_service().to_string()));
                async { Ok(()) }
            }))
        })
        .await;

        harness.publisher.publish("orders", &order("abc")).await.unwrap();

        wait_for(|| seen.lock().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *seen.lock(),
            vec![("abc".to_string(), harness.publisher.service_name().to_string())]
        );

        harness.dispatcher.stop().await.unwrap();
    }

    // =============================================================================
    // RETRY BUDGET
    // =============================================================================

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        for failures in 0..=3 {
            let recorder = Recorder::new(failures);
            let handler = recorder.clone();
            let harness = Harness::start(broker_config("fulfilment"), |b| {
                b.handler::<OrderPlaced, _>(handler)
            })
            .await;

            harness.publisher.publish("orders", &order("abc")).await.unwrap();

            wait_for(|| recorder.attempts().len() == failures + 1).await;
            tokio::time::sleep(Duration::from_millis(30)).await;
            let expected: Vec<u32> = (0..=failures as u32).collect();
            assert_eq!(recorder.retry_counts(), expected, "failures = {failures}");

            harness.dispatcher.stop().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_exhausts_budget() {
        let recorder = Recorder::new(usize::MAX);
        let handler = recorder.clone();
        let config = BrokerConfig {
            retry: RetryPolicy::immediate(5),
            ..broker_config("fulfilment")
        };
        let harness = Harness::start(config, |b| b.handler::<OrderPlaced, _>(handler)).await;

        harness.publisher.publish("orders", &order("abc")).await.unwrap();
        wait_for(|| recorder.attempts().len() == 6).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.retry_counts(), vec![0, 1, 2, 3, 4, 5]);

        // The dispatcher keeps serving after a dropped message
        harness.publisher.publish("orders", &order("def")).await.unwrap();
        wait_for(|| recorder.attempts().len() == 12).await;
        assert_eq!(harness.dispatcher.state(), DispatcherState::Listening);

        harness.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_retry_policy_attempts_once() {
        let recorder = Recorder::new(usize::MAX);
        let handler = recorder.clone();
        let config = BrokerConfig {
            retry: RetryPolicy::none(),
            ..broker_config("fulfilment")
        };
        let harness = Harness::start(config, |b| b.handler::<OrderPlaced, _>(handler)).await;

        harness.publisher.publish("orders", &order("abc")).await.unwrap();
        wait_for(|| recorder.attempts().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.retry_counts(), vec![0]);

        harness.dispatcher.stop().await.unwrap();
    }

    // =============================================================================
    // FAN-OUT AND ISOLATION
    // =============================================================================

    #[tokio::test]
    async fn test_every_handler_of_a_type_sees_every_message() {
        let first = Recorder::new(0);
        let second = Recorder::new(0);
        let (a, b) = (first.clone(), second.clone());
        let harness = Harness::start(broker_config("fulfilment"), |builder| {
            builder
                .handler::<OrderPlaced, _>(a)
                .handler::<OrderPlaced, _>(b)
        })
        .await;

        for i in 0..20 {
            harness
                .publisher
                .publish("orders", &order(&format!("order-{i}")))
                .await
                .unwrap();
        }

        wait_for(|| first.attempts().len() == 20 && second.attempts().len() == 20).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        for recorder in [&first, &second] {
            let mut ids: Vec<String> = recorder.attempts().into_iter().map(|(id, _)| id).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 20);
            assert!(recorder.retry_counts().iter().all(|n| *n == 0));
        }

        harness.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_starve_sibling() {
        let failing = Recorder::new(usize::MAX);
        let healthy = Recorder::new(0);
        let (a, b) = (failing.clone(), healthy.clone());
        let harness = Harness::start(broker_config("fulfilment"), |builder| {
            builder
                .handler::<OrderPlaced, _>(a)
                .handler::<OrderPlaced, _>(b)
        })
        .await;

        harness.publisher.publish("orders", &order("abc")).await.unwrap();

        wait_for(|| failing.attempts().len() == 4).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(healthy.retry_counts(), vec![0]);

        harness.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_delay_other_types() {
        let fast_done: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let slow_started = Arc::new(AtomicUsize::new(0));
        let (done, started) = (fast_done.clone(), slow_started.clone());

        let harness = Harness::start(broker_config("fulfilment"), |builder| {
            builder
                .channel("shipping")
                .handler::<OrderPlaced, _>(handler_fn(move |_: OrderPlaced, _| {
                    started.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(())
                    }
                }))
                .handler::<ShipOrder, _>(handler_fn(move |_: ShipOrder, _| {
                    *done.lock() = Some(Instant::now());
                    async { Ok(()) }
                }))
        })
        .await;

        let begin = Instant::now();
        harness.publisher.publish("orders", &order("slow")).await.unwrap();
        wait_for(|| slow_started.load(Ordering::SeqCst) == 1).await;
        harness
            .publisher
            .publish(
                "shipping",
                &ShipOrder {
                    order_id: "fast".into(),
                    warehouse: "north".into(),
                },
            )
            .await
            .unwrap();

        wait_for(|| fast_done.lock().is_some()).await;
        let finished_at = *fast_done.lock();
        let elapsed = finished_at.map(|at| at - begin).unwrap_or_default();
        assert!(elapsed < Duration::from_secs(1), "fast handler waited {elapsed:?}");

        harness.dispatcher.stop().await.unwrap();
    }

    // =============================================================================
    // HOSTILE INPUT
    // =============================================================================

    #[tokio::test]
    async fn test_garbage_flood_then_valid_message() {
        let recorder = Recorder::new(0);
        let handler = recorder.clone();
        let harness = Harness::start(broker_config("fulfilment"), |b| {
            b.handler::<OrderPlaced, _>(handler)
        })
        .await;

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let garbage: Vec<u8> = (0..rng.gen_range(0..128)).map(|_| rng.gen()).collect();
            harness
                .transport
                .publish("orders", Bytes::from(garbage))
                .await
                .unwrap();
        }
        harness.publisher.publish("orders", &order("valid")).await.unwrap();

        wait_for(|| recorder.attempts().len() == 1).await;
        assert_eq!(recorder.attempts()[0].0, "valid");
        assert_eq!(harness.dispatcher.state(), DispatcherState::Listening);

        harness.dispatcher.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unhandled_type_is_dropped_quietly() {
        let recorder = Recorder::new(0);
        let handler = recorder.clone();
        let harness = Harness::start(broker_config("fulfilment"), |b| {
            b.handler::<OrderPlaced, _>(handler)
        })
        .await;

        // Registered, but this dispatcher has no handler for it
        harness
            .publisher
            .publish("orders", &InventorySnapshot::with_items(3))
            .await
            .unwrap();
        harness.publisher.publish("orders", &order("abc")).await.unwrap();

        wait_for(|| recorder.attempts().len() == 1).await;
        harness.dispatcher.stop().await.unwrap();
    }

    // =============================================================================
    // SHUTDOWN
    // =============================================================================

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_handler() {
        let finished = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let (f, s) = (finished.clone(), started.clone());
        let harness = Harness::start(broker_config("fulfilment"), |b| {
            b.handler::<OrderPlaced, _>(handler_fn(move |_: OrderPlaced, _| {
                let f = f.clone();
                s.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }))
        })
        .await;

        harness.publisher.publish("orders", &order("abc")).await.unwrap();
        wait_for(|| started.load(Ordering::SeqCst) == 1).await;

        harness.dispatcher.stop().await.unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(harness.transport.subscriber_count("orders"), 0);
    }
}
