// tests/load_balancer_tests.rs
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use upstream_balancer::config::LoadBalancerAlgorithm;
use upstream_balancer::load_balancer::Balancer;
use upstream_balancer::proxy::{Backend, PoolError};
use url::Url;

fn url(port: u16) -> Url {
    Url::parse(&format!("http://10.0.0.1:{port}")).unwrap()
}

fn balancer_with(algorithm: LoadBalancerAlgorithm, n: u16) -> Balancer {
    let balancer = Balancer::new(algorithm);
    balancer
        .register((1..=n).map(|port| Backend::new(url(port))))
        .unwrap();
    balancer
}

async fn pick_counts(balancer: &Balancer, calls: usize) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for _ in 0..calls {
        if let Some(b) = balancer.next_server().await {
            *counts.entry(b.id.clone()).or_insert(0) += 1;
        }
    }
    counts
}

#[tokio::test]
async fn test_duplicate_registration_leaves_registry_unchanged() {
    let balancer = balancer_with(LoadBalancerAlgorithm::Basic, 2);

    let err = balancer
        .register([Backend::new(url(9)), Backend::new(url(2))])
        .unwrap_err();

    assert_eq!(err, PoolError::DuplicateBackend("http://10.0.0.1:2".into()));
    assert_eq!(balancer.list().len(), 2);
}

#[tokio::test]
async fn test_basic_returns_first_healthy() {
    let balancer = balancer_with(LoadBalancerAlgorithm::Basic, 3);
    let list = balancer.list();
    list[0].update_health(false, Duration::ZERO).await;

    for _ in 0..10 {
        assert_eq!(balancer.next_server().await.unwrap().id, list[1].id);
    }
}

#[tokio::test]
async fn test_round_robin_distribution() {
    let balancer = balancer_with(LoadBalancerAlgorithm::RoundRobin, 3);
    let counts = pick_counts(&balancer, 30).await;

    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 10));
}

#[tokio::test]
async fn test_round_robin_never_returns_unhealthy() {
    let balancer = balancer_with(LoadBalancerAlgorithm::RoundRobin, 4);
    let list = balancer.list();
    list[2].update_health(false, Duration::ZERO).await;

    let counts = pick_counts(&balancer, 30).await;

    assert!(!counts.contains_key(&list[2].id));
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_robin_concurrent_callers_share_one_cursor() {
    let balancer = Arc::new(balancer_with(LoadBalancerAlgorithm::RoundRobin, 4));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let balancer = balancer.clone();
            tokio::spawn(async move {
                let mut picked = Vec::new();
                for _ in 0..100 {
                    picked.push(balancer.next_server().await.unwrap().id.clone());
                }
                picked
            })
        })
        .collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for task in tasks {
        for id in task.await.unwrap() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&c| c == 100), "{counts:?}");
}

#[tokio::test]
async fn test_least_connections_with_tie_break() {
    let balancer = balancer_with(LoadBalancerAlgorithm::LeastConnections, 3);
    let list = balancer.list();
    let _b1 = [list[0].acquire(), list[0].acquire()];
    let _b3 = list[2].acquire();

    assert_eq!(balancer.next_server().await.unwrap().id, list[1].id);

    let _b2 = list[1].acquire();
    assert_eq!(balancer.next_server().await.unwrap().id, list[1].id);
}

#[tokio::test]
async fn test_least_latency_single_healthy_backend() {
    let balancer = balancer_with(LoadBalancerAlgorithm::LeastLatency, 2);
    let list = balancer.list();
    list[0].update_health(false, Duration::from_millis(1)).await;

    assert_eq!(balancer.next_server().await.unwrap().id, list[1].id);
}

#[tokio::test]
async fn test_all_strategies_return_none_when_everything_is_down() {
    for algorithm in [
        LoadBalancerAlgorithm::Basic,
        LoadBalancerAlgorithm::RoundRobin,
        LoadBalancerAlgorithm::LeastConnections,
        LoadBalancerAlgorithm::LeastLatency,
    ] {
        let balancer = balancer_with(algorithm, 3);
        for b in balancer.list().iter() {
            b.update_health(false, Duration::ZERO).await;
        }
        assert!(balancer.next_server().await.is_none(), "{algorithm:?}");
        assert_eq!(balancer.list().len(), 3, "unhealthy backends stay registered");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deregistered_backend_is_never_selected_afterwards() {
    let balancer = Arc::new(balancer_with(LoadBalancerAlgorithm::RoundRobin, 3));
    let removed_id = balancer.list()[1].id.clone();
    let removed = Arc::new(AtomicBool::new(false));

    let selectors: Vec<_> = (0..4)
        .map(|_| {
            let balancer = balancer.clone();
            let removed = removed.clone();
            let removed_id = removed_id.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let after_removal = removed.load(Ordering::SeqCst);
                    let picked = balancer.next_server().await.unwrap();
                    if after_removal {
                        assert_ne!(picked.id, removed_id);
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(1)).await;
    balancer.deregister(&url(2)).unwrap();
    removed.store(true, Ordering::SeqCst);

    for selector in selectors {
        selector.await.unwrap();
    }

    assert!(balancer.list().iter().all(|b| b.id != removed_id));
    let err = balancer.deregister(&url(2)).unwrap_err();
    assert!(matches!(err, PoolError::BackendNotFound(_)));
}

proptest! {
    #[test]
    fn round_robin_spreads_evenly(n in 1u16..8, m in 0usize..200) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let counts = runtime.block_on(async {
            let balancer = balancer_with(LoadBalancerAlgorithm::RoundRobin, n);
            pick_counts(&balancer, m).await
        });

        let n = n as usize;
        let floor = m / n;
        let ceil = (m + n - 1) / n;
        prop_assert_eq!(counts.values().sum::<usize>(), m);
        if m >= n {
            prop_assert_eq!(counts.len(), n);
        }
        for count in counts.values() {
            prop_assert!(*count == floor || *count == ceil);
        }
    }
}
