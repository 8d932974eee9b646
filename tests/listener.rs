mod common;

use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{init_tracing, with_timeout, TestResult};
use privhelper::client::HelperConnection;
use privhelper::errors::HelperError;
use privhelper::identity::{CodeIdentityVerifier, IdentityVerifier};
use privhelper_test_utils::builders::TestEnv;
use privhelper_test_utils::fake_authority::FakeAuthority;
use privhelper_test_utils::fake_executor::RecordingBackend;
use privhelper_test_utils::harness::{start_worker, WorkerHarness};
use privhelper_test_utils::recording_sink::RecordingSink;
use privhelper_test_utils::verifiers::{AcceptAll, ErroringVerifier, RejectAll};

const POLL: Duration = Duration::from_millis(50);

fn worker(env: &TestEnv, accept: bool) -> Result<WorkerHarness, HelperError> {
    let verifier: Arc<dyn IdentityVerifier> = if accept {
        Arc::new(AcceptAll)
    } else {
        Arc::new(RejectAll)
    };
    worker_verified_by(env, verifier)
}

fn worker_verified_by(
    env: &TestEnv,
    verifier: Arc<dyn IdentityVerifier>,
) -> Result<WorkerHarness, HelperError> {
    start_worker(
        &env.config,
        Arc::new(FakeAuthority::granting()),
        Arc::new(RecordingBackend::new()),
        verifier,
    )
}

async fn connect(w: &WorkerHarness) -> Result<HelperConnection, HelperError> {
    HelperConnection::connect(&w.socket_path, Arc::new(RecordingSink::new())).await
}

/// Wait until `cond` holds, polling every few milliseconds.
async fn eventually(cond: impl Fn() -> bool) {
    while !cond() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn socket_is_world_connectable() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker(&env, true)?;

    let meta = fs::metadata(&w.socket_path)?;
    assert!(meta.file_type().is_socket());
    assert_eq!(meta.permissions().mode() & 0o777, 0o666);

    w.handle.request_shutdown();
    with_timeout(w.join).await??;
    Ok(())
}

#[tokio::test]
async fn stale_socket_is_replaced() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));

    let first = worker(&env, true)?;
    // Simulate a crash: stop the task without running cleanup.
    first.join.abort();
    let _ = first.join.await;
    assert!(env.config.helper.socket_path.exists());

    let second = worker(&env, true)?;
    let conn = connect(&second).await?;
    assert!(with_timeout(conn.get_version()).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn non_socket_file_at_socket_path_is_refused() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    fs::write(&env.config.helper.socket_path, "not a socket")?;

    let result = worker(&env, true);
    assert!(matches!(result, Err(HelperError::Config(_))));
    Ok(())
}

#[tokio::test]
async fn last_connection_closing_stops_worker_within_poll_interval() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker(&env, true)?;

    let conn = connect(&w).await?;
    with_timeout(conn.get_version()).await?;
    assert_eq!(w.handle.active_connections(), 1);
    assert!(!w.handle.should_quit());

    drop(conn);
    with_timeout(eventually(|| w.handle.active_connections() == 0)).await;
    let emptied = Instant::now();
    assert!(w.handle.should_quit());

    with_timeout(w.join).await??;
    // One interval plus scheduling slack.
    assert!(emptied.elapsed() < POLL * 6, "took {:?}", emptied.elapsed());
    assert!(!env.config.helper.socket_path.exists());
    Ok(())
}

#[tokio::test]
async fn worker_stays_up_while_any_connection_remains() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker(&env, true)?;

    let first = connect(&w).await?;
    let second = connect(&w).await?;
    with_timeout(first.get_version()).await?;
    with_timeout(second.get_version()).await?;
    assert_eq!(w.handle.active_connections(), 2);

    drop(first);
    with_timeout(eventually(|| w.handle.active_connections() == 1)).await;
    tokio::time::sleep(POLL * 3).await;
    assert!(!w.handle.should_quit());
    assert!(!w.join.is_finished());

    // The surviving connection still works.
    with_timeout(second.get_version()).await?;

    drop(second);
    with_timeout(w.join).await??;
    Ok(())
}

#[tokio::test]
async fn rejected_peer_is_never_added() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker(&env, false)?;

    let conn = connect(&w).await?;
    let result = with_timeout(conn.get_version()).await;
    assert!(matches!(result, Err(HelperError::Connection(_))), "got {result:?}");
    assert!(!conn.is_valid());
    assert_eq!(w.handle.active_connections(), 0);

    // Rejections do not count as "last connection closed".
    tokio::time::sleep(POLL * 3).await;
    assert!(!w.handle.should_quit());

    w.handle.request_shutdown();
    with_timeout(w.join).await??;
    Ok(())
}

#[tokio::test]
async fn explicit_shutdown_drops_live_sessions() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker(&env, true)?;

    let conn = connect(&w).await?;
    with_timeout(conn.get_version()).await?;

    w.handle.request_shutdown();
    with_timeout(w.join).await??;

    with_timeout(eventually(|| !conn.is_valid())).await;
    assert!(conn.get_version().await.is_err());
    Ok(())
}

#[tokio::test]
async fn verification_error_closes_the_connection() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let w = worker_verified_by(&env, Arc::new(ErroringVerifier))?;

    let conn = connect(&w).await?;
    let result = with_timeout(conn.get_version()).await;
    assert!(matches!(result, Err(HelperError::Connection(_))), "got {result:?}");
    assert_eq!(w.handle.active_connections(), 0);
    assert!(!w.handle.should_quit());

    w.handle.request_shutdown();
    with_timeout(w.join).await??;
    Ok(())
}

#[tokio::test]
async fn same_executable_is_admitted_by_digest() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    // Client and worker share this test process, so the digests match.
    let w = worker_verified_by(&env, Arc::new(CodeIdentityVerifier::for_current_exe(&[])?))?;

    let conn = connect(&w).await?;
    with_timeout(conn.get_version()).await?;
    assert_eq!(w.handle.active_connections(), 1);

    let peers = w.handle.active_peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].uid, nix::unistd::Uid::current().as_raw());
    assert_eq!(peers[0].pid, Some(std::process::id() as i32));

    drop(conn);
    with_timeout(w.join).await??;
    Ok(())
}

#[tokio::test]
async fn foreign_digest_is_refused() -> TestResult {
    init_tracing();
    let env = TestEnv::with(|b| b.poll_interval(POLL));
    let verifier = CodeIdentityVerifier::with_digests(["0".repeat(64)]);
    let w = worker_verified_by(&env, Arc::new(verifier))?;

    let conn = connect(&w).await?;
    let result = with_timeout(conn.get_version()).await;
    assert!(matches!(result, Err(HelperError::Connection(_))), "got {result:?}");
    assert_eq!(w.handle.active_connections(), 0);

    w.handle.request_shutdown();
    with_timeout(w.join).await??;
    Ok(())
}
