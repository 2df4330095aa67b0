use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use loopload::{LoadContext, LoadError, LoadState, LoopLoad, LoopLoadConfig, Reload};
use tokio::sync::Semaphore;

use crate::utils::{numbered, setup};

#[tokio::test]
async fn test_concurrent_loads_collapse() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let loader_gate = Arc::clone(&gate);
    let slot = Arc::new(LoopLoad::new(
        "collapse",
        numbered(&calls, move |n, _ctx| {
            let gate = Arc::clone(&loader_gate);
            async move {
                if n > 1 {
                    gate.acquire().await?.forget();
                }
                anyhow::Ok(n)
            }
        }),
        LoopLoadConfig::default(),
    ));
    slot.start(LoadContext::new()).await.unwrap();

    let in_flight = tokio::spawn({
        let slot = Arc::clone(&slot);
        async move { slot.load(LoadContext::new()).await }
    });
    while slot.load_state() != LoadState::Loading {
        tokio::task::yield_now().await;
    }

    let (a, b) = tokio::join!(
        slot.load(LoadContext::new()),
        slot.load(LoadContext::new())
    );
    assert_eq!(a.unwrap(), Reload::Skipped);
    assert_eq!(b.unwrap(), Reload::Skipped);
    // the value of the in-flight load is not visible yet
    assert_eq!(*slot.get(&LoadContext::new()), 1);

    gate.add_permits(1);
    assert_eq!(in_flight.await.unwrap().unwrap(), Reload::Committed);
    assert_eq!(*slot.get(&LoadContext::new()), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(slot.stats().skipped, 2);

    slot.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_reloads_keep_last_value() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let slot = LoopLoad::new(
        "sticky",
        numbered(&calls, |n, _ctx| async move {
            match n {
                2 | 3 => anyhow::bail!("upstream returned 503"),
                n => Ok(n * 10),
            }
        }),
        LoopLoadConfig::default().reload_interval(Duration::from_secs(1)),
    );

    slot.start(LoadContext::new()).await.unwrap();
    let first_refresh = slot.last_refresh();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(*slot.get(&LoadContext::new()), 10);
    assert_eq!(slot.stats().fail, 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*slot.get(&LoadContext::new()), 10);
    assert_eq!(slot.stats().fail, 2);
    assert_eq!(slot.last_refresh(), first_refresh);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*slot.get(&LoadContext::new()), 40);
    assert_eq!(slot.stats().success, 2);
    assert!(slot.is_running());

    slot.close().await;
}

#[tokio::test]
async fn test_on_demand_failure_is_returned() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let slot = LoopLoad::new(
        "on_demand",
        numbered(&calls, |n, _ctx| async move {
            if n == 2 {
                anyhow::bail!("table is being rebuilt");
            }
            Ok(format!("generation {n}"))
        }),
        LoopLoadConfig::default(),
    );
    slot.start(LoadContext::new()).await.unwrap();

    let err = slot.load(LoadContext::new()).await.unwrap_err();
    assert!(matches!(err, LoadError::Failed(_)));
    assert!(err.to_string().contains("table is being rebuilt"));
    assert_eq!(*slot.get(&LoadContext::new()), "generation 1");
    assert_eq!(slot.load_state(), LoadState::Ready);

    assert_eq!(
        slot.load(LoadContext::new()).await.unwrap(),
        Reload::Committed
    );
    assert_eq!(*slot.get(&LoadContext::new()), "generation 3");

    slot.close().await;
}

#[tokio::test]
async fn test_loader_panic_is_recovered() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let slot = LoopLoad::new(
        "panicky",
        numbered(&calls, |n, _ctx| async move {
            if n == 2 {
                panic!("index out of bounds");
            }
            anyhow::Ok(n)
        }),
        LoopLoadConfig::default(),
    );
    slot.start(LoadContext::new()).await.unwrap();

    let err = slot.load(LoadContext::new()).await.unwrap_err();
    assert!(matches!(&err, LoadError::Panicked(msg) if msg == "index out of bounds"));
    assert!(err.is_failure());
    assert_eq!(*slot.get(&LoadContext::new()), 1);
    assert_eq!(slot.load_state(), LoadState::Ready);
    assert_eq!(slot.stats().exception, 1);

    slot.load(LoadContext::new()).await.unwrap();
    assert_eq!(*slot.get(&LoadContext::new()), 3);

    slot.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_values() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let slot = Arc::new(LoopLoad::new(
        "whole",
        numbered(&calls, |n, _ctx| async move { anyhow::Ok(vec![n; 256]) }),
        LoopLoadConfig::default().reload_interval(Duration::from_millis(1)),
    ));
    slot.start(LoadContext::new()).await.unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let mut last_seen = 0;
                for _ in 0..5_000 {
                    let value = slot.get(&LoadContext::new());
                    assert_eq!(value.len(), 256);
                    assert!(value.iter().all(|v| *v == value[0]));
                    // commits are ordered, a reader never goes back in time
                    assert!(value[0] >= last_seen);
                    last_seen = value[0];
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..200 {
        slot.load(LoadContext::new()).await.unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    slot.close().await;
}
