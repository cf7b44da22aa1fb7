use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use window_throttle::{
    config::load_config_from_yaml, AcquireOutcome, FixedWindowConfig, FixedWindowLimiter,
};

fn manual_policy(permit_limit: u32, window: Duration) -> FixedWindowConfig {
    FixedWindowConfig::new(permit_limit, window).with_auto_rotation(false)
}

#[tokio::test]
async fn test_admissions_bounded_by_permit_limit() {
    let limiter = FixedWindowLimiter::new(manual_policy(5, Duration::from_secs(60))).unwrap();

    for _ in 0..5 {
        assert_eq!(limiter.try_acquire(), AcquireOutcome::Admitted);
    }
    for _ in 0..10 {
        assert_eq!(limiter.try_acquire(), AcquireOutcome::Rejected);
    }

    let stats = limiter.stats();
    assert_eq!(stats.admitted, 5);
    assert_eq!(stats.rejected, 10);
    assert_eq!(stats.available_permits, 0);
}

#[tokio::test]
async fn test_window_reset_restores_permits() {
    let limiter = FixedWindowLimiter::new(FixedWindowConfig::new(2, Duration::from_millis(200)))
        .unwrap();

    assert_eq!(limiter.try_acquire(), AcquireOutcome::Admitted);
    assert_eq!(limiter.try_acquire(), AcquireOutcome::Admitted);
    assert_eq!(limiter.try_acquire(), AcquireOutcome::Rejected);

    sleep(Duration::from_millis(250)).await;
    assert_eq!(limiter.try_acquire(), AcquireOutcome::Admitted);
}

#[tokio::test]
async fn test_rotation_keeps_aligned_boundaries() {
    let limiter = FixedWindowLimiter::new(manual_policy(1, Duration::from_millis(100))).unwrap();

    // Several windows pass without anyone touching the limiter
    sleep(Duration::from_millis(350)).await;
    assert!(limiter.try_rotate());

    // Catching up skips whole windows; the next boundary is less than one
    // window away, not a full window from the rotate call.
    let remaining = limiter.duration_until_reset();
    assert!(remaining <= Duration::from_millis(100));
    assert_eq!(limiter.stats().rotations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_acquires_never_exceed_limit() {
    let limiter =
        Arc::new(FixedWindowLimiter::new(manual_policy(100, Duration::from_secs(60))).unwrap());
    let admitted = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let limiter = Arc::clone(&limiter);
        let admitted = Arc::clone(&admitted);
        handles.push(tokio::spawn(async move {
            for _ in 0..25 {
                if limiter.try_acquire().is_admitted() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 800 attempts against a limit of 100: no lost or double-counted permits
    assert_eq!(admitted.load(Ordering::SeqCst), 100);
    let stats = limiter.stats();
    assert_eq!(stats.admitted, 100);
    assert_eq!(stats.rejected, 700);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stress_across_rotations_keeps_per_window_bound() {
    let limiter =
        Arc::new(FixedWindowLimiter::new(manual_policy(10, Duration::from_millis(50))).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            for _ in 0..40 {
                let _ = limiter.try_acquire();
                sleep(Duration::from_millis(2)).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Each window observed can have granted at most permit_limit permits
    let stats = limiter.stats();
    assert!(
        stats.admitted <= (stats.rotations + 1) * 10,
        "admitted {} across {} rotations",
        stats.admitted,
        stats.rotations
    );
    assert!(stats.admitted > 0);
}

#[tokio::test]
async fn test_limiter_from_yaml_policy() {
    let yaml = r#"
permit_limit: 3
window_ms: 60000
queue_limit: 1
"#;

    let config = load_config_from_yaml(yaml).unwrap();
    let limiter = FixedWindowLimiter::new(config).unwrap();

    assert_eq!(limiter.available_permits(), 3);
    assert_eq!(limiter.config().queue_limit, 1);
    assert_eq!(limiter.try_acquire(), AcquireOutcome::Admitted);
}

#[tokio::test]
async fn test_invalid_policies_refused() {
    assert!(FixedWindowLimiter::new(manual_policy(0, Duration::from_secs(1))).is_err());
    assert!(FixedWindowLimiter::new(manual_policy(1, Duration::ZERO)).is_err());
}
