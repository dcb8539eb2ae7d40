use std::io::Write;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::async_task::task_with_timeout_and_exponential_backoff;
use super::file_io::open_file_for_append;
use super::file_io::read_if_exists;
use super::file_io::write_atomically;
use super::time::now_millis;
use super::CountDownLatch;
use crate::Error;

#[tokio::test]
async fn latch_releases_waiter_after_last_count_down() {
    let latch = Arc::new(CountDownLatch::new(3));

    for _ in 0..3 {
        let latch = latch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            latch.count_down();
        });
    }

    assert!(latch.wait_timeout(Duration::from_secs(1)).await);
    assert_eq!(latch.count(), 0);
}

#[tokio::test]
async fn latch_with_zero_count_does_not_block() {
    let latch = CountDownLatch::new(0);
    latch.count_down();
    assert_eq!(latch.count(), 0);
    assert!(latch.wait_timeout(Duration::from_millis(10)).await);
}

#[tokio::test]
async fn latch_times_out_while_workers_remain() {
    let latch = CountDownLatch::new(2);
    latch.count_down();
    assert!(!latch.wait_timeout(Duration::from_millis(20)).await);
    assert_eq!(latch.count(), 1);
}

#[test]
fn write_atomically_replaces_content_and_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state.json");

    write_atomically(&path, b"first").unwrap();
    write_atomically(&path, b"second").unwrap();

    assert_eq!(read_if_exists(&path).unwrap().unwrap(), b"second");
    let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn read_if_exists_returns_none_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_if_exists(&dir.path().join("missing")).unwrap().is_none());
}

#[test]
fn now_millis_moves_forward() {
    let t1 = now_millis();
    std::thread::sleep(Duration::from_millis(5));
    assert!(now_millis() > t1);
}

#[tokio::test]
async fn backoff_task_retries_until_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            let current = counter.fetch_add(1, Ordering::SeqCst);
            if current == 0 {
                Err(Error::Fatal("First attempt fails".to_string()))
            } else {
                Ok::<_, crate::Error>(current)
            }
        }
    };

    let result = task_with_timeout_and_exponential_backoff(
        task,
        3,
        Duration::from_millis(1),
        Duration::from_secs(1),
    )
    .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn backoff_task_returns_last_error_after_max_retries() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let task = move || {
        let counter = counter_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(Error::Fatal("Always fails".to_string()))
        }
    };

    let result = task_with_timeout_and_exponential_backoff(
        task,
        3,
        Duration::from_millis(1),
        Duration::from_secs(1),
    )
    .await;

    assert!(matches!(result, Err(Error::Fatal(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn open_file_for_append_creates_parent_and_keeps_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("ha.log");

    let mut file = open_file_for_append(&path).unwrap();
    file.write_all(b"one\n").unwrap();
    drop(file);
    let mut file = open_file_for_append(&path).unwrap();
    file.write_all(b"two\n").unwrap();
    drop(file);

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
}
