use std::{net::Ipv4Addr, sync::Arc};

use linkshape_tc::{EngineOptions, Error, ImpairmentRequest, LinkSpeed, Rate, RateUnit};

use crate::common::{engine, engine_with, FakeKernel};

#[tokio::test]
async fn lists_addressed_non_loopback_interfaces() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(
        FakeKernel::new()
            .with_link("wlan0", None)
            .with_link("eth1", Some("192.168.1.10"))
            .with_speed("eth0", 1000),
    );
    let (engine, _) = engine(&kernel);

    engine
        .apply_impairment("eth1", &ImpairmentRequest::new().with_delay("5ms").with_rate("3Mbit"))
        .await
        .unwrap();

    let interfaces = engine.list_interfaces().await.unwrap();
    let names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, ["eth0", "eth1"]);

    let eth0 = &interfaces[0];
    assert_eq!(eth0.address, Some(Ipv4Addr::new(10, 0, 0, 2)));
    assert!(eth0.profile.is_clean());
    assert_eq!(eth0.link_speed, Some(LinkSpeed(1000)));

    // A shaped interface reports its cap instead of the link speed.
    let eth1 = &interfaces[1];
    assert_eq!(eth1.profile.rate, Rate::new(3, RateUnit::Mbit));
    assert_eq!(eth1.link_speed, None);
    assert!(!kernel.calls().iter().any(|argv| argv == &["ethtool", "eth1"]));
}

#[tokio::test]
async fn link_speed_is_best_effort() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(FakeKernel::new());
    kernel.fail_when("ethtool", "Cannot get device settings: Operation not supported\n");
    let (engine, _) = engine(&kernel);

    let interfaces = engine.list_interfaces().await.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].link_speed, None);

    // Probing can be switched off entirely.
    kernel.clear_calls();
    let (engine, _) = engine_with(&kernel, EngineOptions::default().with_link_speed_probe(false));
    engine.list_interfaces().await.unwrap();
    assert!(!kernel.calls().iter().any(|argv| argv[0] == "ethtool"));
}

#[tokio::test]
async fn listing_failure_is_an_error() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(FakeKernel::new());
    kernel.break_listing();
    let (engine, _) = engine(&kernel);

    let err = engine.list_interfaces().await.unwrap_err();
    assert!(matches!(err, Error::Discovery(_)), "{err}");
    assert!(err.to_string().contains("Cannot open netlink socket"));
}

#[tokio::test]
async fn inspection_failures_degrade_to_clean() {
    let _ = tracing_subscriber::fmt::try_init();

    let kernel = Arc::new(FakeKernel::new());
    kernel.fail_when("qdisc show", "RTNETLINK answers: Operation not permitted\n");
    let (engine, _) = engine(&kernel);

    let interfaces = engine.list_interfaces().await.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert!(interfaces[0].profile.is_clean());
}
