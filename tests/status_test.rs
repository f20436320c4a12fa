// Counter and identity properties of the status record

use ok_server::status::{Identity, StatusRecord};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn identity() -> Identity {
    Identity {
        node_name: "n1".to_string(),
        pod_name: "p1".to_string(),
        pod_ip: "10.0.0.7".to_string(),
        namespace: "default".to_string(),
        service_account: "ok".to_string(),
    }
}

#[test]
fn test_sequential_hits_count_from_one() {
    let record = StatusRecord::new("0.0.0", identity());

    let counts: Vec<u64> = (0..50).map(|_| record.hit().count).collect();
    let expected: Vec<u64> = (1..=50).collect();

    assert_eq!(counts, expected);
}

#[test]
fn test_concurrent_hits_have_no_gaps_or_repeats() {
    let record = Arc::new(StatusRecord::new("0.0.0", identity()));
    let threads = 8;
    let per_thread = 250;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let record = Arc::clone(&record);
            thread::spawn(move || (0..per_thread).map(|_| record.hit().count).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for count in handle.join().unwrap() {
            assert!(seen.insert(count), "count {} observed twice", count);
        }
    }

    let total = (threads * per_thread) as u64;
    assert_eq!(seen, (1..=total).collect::<HashSet<_>>());
    assert_eq!(record.snapshot().count, total);
}

#[test]
fn test_identity_fields_never_change() {
    let record = StatusRecord::new("1.0.0", identity());
    let first = record.hit();

    for _ in 0..10 {
        let next = record.hit();
        assert_eq!(next.version, first.version);
        assert_eq!(next.identity, first.identity);
    }
}

#[test]
fn test_identity_from_env_defaults_to_empty() {
    let identity = Identity::from_env(|key| match key {
        "NODE_NAME" => Some("n1".to_string()),
        "POD_NAME" => Some("p1".to_string()),
        _ => None,
    });

    assert_eq!(identity.node_name, "n1");
    assert_eq!(identity.pod_name, "p1");
    assert_eq!(identity.pod_ip, "");
    assert_eq!(identity.namespace, "");
    assert_eq!(identity.service_account, "");
}

#[test]
fn test_snapshot_does_not_count() {
    let record = StatusRecord::new("1.0.0", Identity::default());
    assert_eq!(record.snapshot().count, 0);
    assert_eq!(record.snapshot().count, 0);
    assert_eq!(record.hit().count, 1);
}
