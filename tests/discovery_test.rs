//! Discovery scenarios against an in-memory responder

mod common;

use common::{cancel_after, remote_record, spec, Network, SERVICE_TYPE};
use iotcomm_core::ServiceSpec;
use iotcomm_discovery::{Delivered, DiscoveryError};
use tokio_util::sync::CancellationToken;

/// Runs a discover loop for `millis` and returns everything it delivered.
async fn discover_for(
    network: &Network,
    local: &[&str],
    query: ServiceSpec,
    millis: u64,
) -> Vec<Result<Delivered, DiscoveryError>> {
    let engine = network.engine(local);
    let cancel = CancellationToken::new();
    cancel_after(&cancel, millis);

    let mut results = Vec::new();
    engine
        .discover(query, cancel, |result| results.push(result))
        .await
        .expect("discover loop failed");
    results
}

fn delivered_names(results: Vec<Result<Delivered, DiscoveryError>>) -> Vec<String> {
    results
        .into_iter()
        .map(|result| result.expect("unexpected error").spec.service_name)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_multi_homed_service_delivered_once() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm", 5563, &["192.168.1.20", "172.16.0.20"], &[]),
    );

    let results = discover_for(&network, &["10.0.0.9"], spec("therm", 5563), 100).await;
    assert_eq!(results.len(), 1);
    let delivered = results.into_iter().next().unwrap().unwrap();
    assert_eq!(delivered.spec.address.as_deref(), Some("192.168.1.20"));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_announcement_is_duplicate() {
    let network = Network::new(&[]);
    let record = remote_record("therm", 5563, &["192.168.1.20"], &[]);
    network.backend.announce(SERVICE_TYPE, record.clone());

    let engine = network.engine(&["10.0.0.9"]);
    let cancel = CancellationToken::new();
    cancel_after(&cancel, 100);

    let announcer = {
        let backend = network.backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            backend.announce(SERVICE_TYPE, record);
        })
    };

    let mut count = 0;
    engine
        .discover(spec("therm", 0), cancel, |result| {
            result.expect("unexpected error");
            count += 1;
        })
        .await
        .unwrap();
    announcer.await.unwrap();

    assert_eq!(count, 1);
    assert_eq!(engine.known_addresses("therm").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_port_mismatch_never_delivers() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm", 5563, &["192.168.1.20"], &[]),
    );

    let results = discover_for(&network, &["10.0.0.9"], spec("therm", 9999), 100).await;
    assert!(results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_name_is_a_pattern() {
    let network = Network::new(&[]);
    for name in ["therm-1", "therm-2", "thermostat", "humid-1"] {
        network.backend.announce(
            SERVICE_TYPE,
            remote_record(name, 5563, &["192.168.1.20"], &[]),
        );
    }

    let results = discover_for(&network, &["10.0.0.9"], spec("^therm-[0-9]+$", 0), 100).await;
    assert_eq!(delivered_names(results), vec!["therm-1", "therm-2"]);

    let results = discover_for(&network, &["10.0.0.9"], spec("therm", 0), 100).await;
    assert_eq!(delivered_names(results), vec!["therm-1", "therm-2", "thermostat"]);
}

#[tokio::test(start_paused = true)]
async fn test_any_query_property_matches() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm-c", 5563, &["192.168.1.20"], &[("unit", "C")]),
    );
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm-f", 5564, &["192.168.1.21"], &[("unit", "F")]),
    );
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm-x", 5565, &["192.168.1.22"], &[]),
    );

    let query = spec("therm", 0)
        .with_property("dataformat", "humidity")
        .with_property("unit", "C");
    let results = discover_for(&network, &["10.0.0.9"], query, 100).await;
    assert_eq!(delivered_names(results), vec!["therm-c"]);
}

#[tokio::test(start_paused = true)]
async fn test_query_comm_params_reach_the_client() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm", 5563, &["192.168.1.20"], &[("unit", "C")]),
    );

    let query = spec("therm", 0).with_comm_param("ssl", "true");
    let results = discover_for(&network, &["10.0.0.9"], query, 100).await;
    let delivered = results.into_iter().next().unwrap().unwrap();
    assert_eq!(delivered.spec.comm_param("ssl"), Some("true"));
    assert_eq!(delivered.spec.property("unit"), Some("C"));
    assert_eq!(delivered.spec.service_type.name, "zmqpubsub");
}

#[tokio::test(start_paused = true)]
async fn test_own_host_reported_as_local_address() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm", 5563, &["10.0.0.9"], &[]),
    );

    let results = discover_for(&network, &["10.0.0.9", "fe80::1"], spec("therm", 0), 100).await;
    let delivered = results.into_iter().next().unwrap().unwrap();
    assert_eq!(delivered.spec.address.as_deref(), Some("127.0.0.1"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_transport_is_reported_and_browsing_continues() {
    let network = Network::new(&[]);
    let mqtt_type = "_mqtt._tcp.local.";
    let mut record = remote_record("therm", 1883, &["192.168.1.20"], &[]);
    record.fullname = format!("therm.{}", mqtt_type);
    network.backend.announce(mqtt_type, record);

    let query = ServiceSpec::new("therm", iotcomm_core::ServiceType::new("mqtt", "tcp"), 0);
    let results = discover_for(&network, &["10.0.0.9"], query, 100).await;

    assert_eq!(results.len(), 1);
    match &results[0] {
        Err(e @ DiscoveryError::Plugin(_)) => assert_eq!(e.code(), 11),
        other => panic!("unexpected result: {:?}", other.as_ref().map(|d| &d.spec)),
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_advertiser_gets_name_conflict() {
    let network = Network::new(&["192.168.1.5"]);
    let first = network.engine(&["192.168.1.5"]);
    let second = network.engine(&["192.168.1.6"]);

    let cancel = CancellationToken::new();
    cancel_after(&cancel, 100);

    let mut first_results = Vec::new();
    let mut second_results = Vec::new();
    let (first_outcome, second_outcome) = tokio::join!(
        first.advertise(spec("therm", 5563), cancel.clone(), |r| first_results.push(r.is_ok())),
        second.advertise(spec("therm", 5564), cancel.clone(), |r| second_results.push(r.is_ok())),
    );

    assert!(first_outcome.is_ok());
    assert!(matches!(
        second_outcome,
        Err(DiscoveryError::NameConflict(ref name)) if name == "therm"
    ));
    assert_eq!(first_results, vec![true]);
    assert_eq!(second_results, vec![false]);
    assert!(second.last_error().unwrap().contains("therm"));
}

#[tokio::test(start_paused = true)]
async fn test_removed_service_is_not_redelivered() {
    let network = Network::new(&[]);
    network.backend.announce(
        SERVICE_TYPE,
        remote_record("therm", 5563, &["192.168.1.20"], &[]),
    );

    let engine = network.engine(&["10.0.0.9"]);
    let cancel = CancellationToken::new();
    cancel_after(&cancel, 100);

    let remover = {
        let backend = network.backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            backend.remove("therm._zmqpubsub._tcp.local.");
            backend.announce(
                SERVICE_TYPE,
                remote_record("therm", 5563, &["192.168.1.20"], &[]),
            );
        })
    };

    let mut count = 0;
    engine
        .discover(spec("therm", 0), cancel, |_| count += 1)
        .await
        .unwrap();
    remover.await.unwrap();

    // The cache keeps (name, address) pairs for the life of the engine
    assert_eq!(count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stopping_one_browser_leaves_the_other_running() {
    let network = Network::new(&[]);
    let early = network.engine(&["10.0.0.8"]);
    let late = network.engine(&["10.0.0.9"]);

    let early_cancel = CancellationToken::new();
    let late_cancel = CancellationToken::new();
    cancel_after(&early_cancel, 50);
    cancel_after(&late_cancel, 200);

    let announcer = {
        let backend = network.backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            backend.announce(
                SERVICE_TYPE,
                remote_record("therm", 5563, &["192.168.1.20"], &[]),
            );
        })
    };

    let mut early_results = Vec::new();
    let mut late_results = Vec::new();
    let (early_outcome, late_outcome) = tokio::join!(
        early.discover(spec("therm", 0), early_cancel, |r| early_results.push(r)),
        late.discover(spec("therm", 0), late_cancel, |r| late_results.push(r)),
    );
    announcer.await.unwrap();

    assert!(early_outcome.is_ok());
    assert!(late_outcome.is_ok(), "late browser ended with {:?}", late_outcome);
    assert!(early_results.is_empty());
    assert_eq!(delivered_names(late_results), vec!["therm"]);
    assert_eq!(network.backend.browser_count(SERVICE_TYPE), 0);
}
