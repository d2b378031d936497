use std::{sync::Arc, time::Duration};

use linkshape_tc::ImpairmentRequest;

use crate::common::{engine, FakeKernel};

#[tokio::test]
async fn different_interfaces_proceed_in_parallel() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(
        FakeKernel::new()
            .with_link("eth1", Some("10.0.1.2"))
            .with_latency(Duration::from_millis(20)),
    );
    let (engine, _) = engine(&kernel);

    let a = ImpairmentRequest::new().with_delay("10ms");
    let b = ImpairmentRequest::new().with_loss(20);

    let (ra, rb) =
        tokio::join!(engine.apply_impairment("eth0", &a), engine.apply_impairment("eth1", &b));

    assert_eq!(ra.unwrap().delay().as_micros(), 10_000);
    assert_eq!(rb.unwrap().loss().get(), 20);
    assert!(kernel.max_global_in_flight() >= 2);
}

#[tokio::test]
async fn same_interface_is_serialized() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(FakeKernel::new().with_latency(Duration::from_millis(10)));
    let (engine, _) = engine(&kernel);
    let engine = Arc::new(engine);

    let mut tasks = Vec::new();
    for loss in [1u8, 2, 3, 4] {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let request = ImpairmentRequest::new().with_loss(loss);
            engine.apply_impairment("eth0", &request).await
        }));
    }

    let mut applied = Vec::new();
    for task in tasks {
        applied.push(task.await.unwrap().unwrap());
    }

    assert_eq!(kernel.max_in_flight("eth0"), 1);

    // Whichever ran last is what the kernel holds, with no stacked rules.
    let snapshot = engine.inspect("eth0").await.unwrap();
    assert!(applied.iter().any(|profile| snapshot == *profile));
    assert_eq!(kernel.hierarchy("eth0").tbf, None);
    assert!(!engine.is_busy("eth0"));
}

#[tokio::test]
async fn busy_while_applying() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(FakeKernel::new().with_latency(Duration::from_millis(50)));
    let (engine, _) = engine(&kernel);
    let engine = Arc::new(engine);

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.apply_impairment("eth0", &ImpairmentRequest::new().with_delay("1ms")).await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.is_busy("eth0"));
    assert!(!engine.is_busy("eth1"));

    task.await.unwrap().unwrap();
    assert!(!engine.is_busy("eth0"));
}
