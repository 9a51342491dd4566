//! Restartable tasks and the FIFO mutex working together

use preview_common::sync::{Mutex, RestartableTask, TaskOutcome};
use preview_common::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

#[tokio::test]
async fn test_executions_never_overlap_on_shared_mutex() {
    let mutex = Arc::new(Mutex::new("decoder"));
    let active = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(StdMutex::new(Vec::new()));

    let task = {
        let mutex = Arc::clone(&mutex);
        let active = Arc::clone(&active);
        let finished = Arc::clone(&finished);
        RestartableTask::<u32, Error>::new("seek", move |target, token| {
            let mutex = Arc::clone(&mutex);
            let active = Arc::clone(&active);
            let finished = Arc::clone(&finished);
            async move {
                let _guard = mutex.acquire().await;
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(10)).await;
                if !token.is_cancelled() {
                    finished.lock().unwrap().push(target);
                }
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    // A competing holder keeps the mutex busy while the burst arrives
    let blocker = mutex.acquire().await;
    let requests: Vec<_> = (1..=5).map(|t| task.request(t)).collect();
    drop(blocker);

    let outcomes = futures::future::join_all(requests).await;
    let outcomes: Vec<_> = outcomes.into_iter().map(Result::unwrap).collect();
    assert_eq!(outcomes[0], TaskOutcome::Cancelled);
    assert!(outcomes[1..4].iter().all(|o| *o == TaskOutcome::Superseded));
    assert_eq!(outcomes[4], TaskOutcome::Completed);
    assert_eq!(*finished.lock().unwrap(), vec![5]);
    assert!(!mutex.is_busy());
}

#[tokio::test]
async fn test_idle_poller_yields_to_queued_waiter() {
    let mutex = Arc::new(Mutex::new("engine"));
    let guard = mutex.acquire().await;

    let waiter = {
        let mutex = Arc::clone(&mutex);
        tokio::spawn(async move {
            let _guard = mutex.acquire().await;
            "waiter"
        })
    };
    while mutex.waiting() == 0 {
        tokio::task::yield_now().await;
    }

    // Handoff goes straight to the queued waiter
    drop(guard);
    assert!(mutex.acquire_if_idle().is_none());
    assert_eq!(waiter.await.unwrap(), "waiter");
    assert!(mutex.acquire_if_idle().is_some());
}

#[tokio::test]
async fn test_panicking_executor_releases_mutex_and_queue() {
    let mutex = Arc::new(Mutex::new("decoder"));
    let task = {
        let mutex = Arc::clone(&mutex);
        RestartableTask::<u32, Error>::new("seek", move |target, _token| {
            let mutex = Arc::clone(&mutex);
            async move {
                let _guard = mutex.acquire().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                if target == 0 {
                    panic!("corrupt packet at {}", target);
                }
                Ok(())
            }
        })
    };

    let panicking = task.request(0);
    let queued = task.request(1);

    match panicking.await {
        Err(Error::TaskPanicked { task, message }) => {
            assert_eq!(task, "seek");
            assert_eq!(message, "corrupt packet at 0");
        }
        other => panic!("expected a panic report, got {:?}", other),
    }
    assert_eq!(queued.await.unwrap(), TaskOutcome::Completed);
    assert!(!task.is_running());
    assert!(!mutex.is_busy());

    let later = tokio::time::timeout(Duration::from_secs(1), task.request(2)).await;
    assert_eq!(later.unwrap().unwrap(), TaskOutcome::Completed);
}
