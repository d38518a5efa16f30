//! Crash-loop backoff: the failure counter climbs with every failed start
//! and gates the controller at its ceiling until a new revision arrives

mod common;

use app_warden::domain::ServiceInfo;
use common::rig;
use std::sync::Arc;

fn flapping_service() -> ServiceInfo {
    let mut info = ServiceInfo::new("flappy", "/bin/false");
    info.working_directory = "/srv/flappy".to_string();
    info
}

#[tokio::test]
async fn crash_loop_hits_ceiling_and_recovers_on_new_revision() {
    let rig = rig(&flapping_service());
    rig.controller
        .set_info(Arc::new(flapping_service()), None)
        .await;

    // Every spawn attempt fails; the default ceiling is 20.
    for attempt in 1..=20u32 {
        rig.launcher.plan_failure("exec failed");
        assert!(!rig.controller.check().await);
        assert_eq!(rig.controller.error_count().await, attempt);
    }
    assert_eq!(rig.launcher.spawn_count(), 20);
    // One error event per failed attempt so far.
    assert_eq!(rig.sink.error_count(), 20);

    // The 21st check announces the ceiling exactly once and stops trying.
    assert!(!rig.controller.check().await);
    assert_eq!(rig.launcher.spawn_count(), 20);
    assert_eq!(rig.sink.error_count(), 21);

    // Further checks are no-ops: no spawns, no repeated announcements.
    for _ in 0..5 {
        assert!(!rig.controller.check().await);
    }
    assert_eq!(rig.launcher.spawn_count(), 20);
    assert_eq!(rig.sink.error_count(), 21);

    // A NEW ServiceInfo instance resets the counter and the next check
    // attempts a start again.
    rig.controller
        .set_info(Arc::new(flapping_service()), None)
        .await;
    assert_eq!(rig.controller.error_count().await, 0);

    assert!(rig.controller.check().await);
    assert_eq!(rig.launcher.spawn_count(), 21);
    assert!(rig.controller.is_running().await);
}

#[tokio::test]
async fn error_count_increases_strictly_across_failed_starts() {
    let rig = rig(&flapping_service());
    rig.controller
        .set_info(Arc::new(flapping_service()), None)
        .await;

    let mut previous = 0;
    for _ in 0..5 {
        rig.launcher.plan_failure("boom");
        rig.controller.start().await;
        let count = rig.controller.error_count().await;
        assert!(count > previous);
        previous = count;
    }
}

#[tokio::test]
async fn healthy_check_resets_the_counter() {
    let rig = rig(&flapping_service());
    rig.controller
        .set_info(Arc::new(flapping_service()), None)
        .await;

    rig.launcher.plan_failure("boom");
    rig.controller.check().await;
    rig.launcher.plan_failure("boom");
    rig.controller.check().await;
    assert_eq!(rig.controller.error_count().await, 2);

    // Third attempt succeeds; the start itself does not reset the counter.
    assert!(rig.controller.check().await);
    assert_eq!(rig.controller.error_count().await, 3);

    // The next check observes the process alive and settles.
    assert!(!rig.controller.check().await);
    assert_eq!(rig.controller.error_count().await, 0);
}
