mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{current_subject, init_tracing, with_timeout, TestResult};
use privhelper::authority::{
    AuthorityError, AuthorizationToken, CredentialAuthority, LocalAuthority,
};
use privhelper::client::HelperConnection;
use privhelper::errors::HelperError;
use privhelper::protocol::RemoteErrorKind;
use privhelper::registry::{CommandId, RuleClass};
use privhelper::types::{
    HelperVersion, StreamKind, AUTHORIZATION_FAILED_EXIT_CODE, UNINSTALL_FAILED_EXIT_CODE,
};
use privhelper_test_utils::builders::{current_group_name, TestEnv};
use privhelper_test_utils::fake_authority::{FakeAuthority, Script};
use privhelper_test_utils::fake_executor::RecordingBackend;
use privhelper_test_utils::harness::{start_worker, WorkerHarness};
use privhelper_test_utils::recording_sink::RecordingSink;
use privhelper_test_utils::verifiers::AcceptAll;

struct Setup {
    env: TestEnv,
    authority: Arc<FakeAuthority>,
    backend: RecordingBackend,
    worker: WorkerHarness,
    sink: Arc<RecordingSink>,
}

fn setup(script: Script, backend: RecordingBackend) -> Result<Setup, Box<dyn std::error::Error>> {
    init_tracing();
    let env = TestEnv::new();
    let authority = Arc::new(FakeAuthority::new(script));
    let worker = start_worker(
        &env.config,
        authority.clone(),
        Arc::new(backend.clone()),
        Arc::new(AcceptAll),
    )?;
    Ok(Setup {
        env,
        authority,
        backend,
        worker,
        sink: Arc::new(RecordingSink::new()),
    })
}

impl Setup {
    async fn connect(&self) -> Result<HelperConnection, HelperError> {
        HelperConnection::connect(&self.worker.socket_path, self.sink.clone()).await
    }

    fn mint(&self) -> AuthorizationToken {
        self.authority.create_empty_token(&current_subject()).unwrap()
    }
}

fn path_arg(path: &str) -> Vec<String> {
    vec![path.to_string()]
}

#[tokio::test]
async fn get_version_reports_bundled_version() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let version = with_timeout(conn.get_version()).await?;
    assert_eq!(version, HelperVersion::bundled());
    Ok(())
}

#[tokio::test]
async fn forged_token_yields_sentinel_and_spawns_nothing() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let forged = AuthorizationToken::from_bytes(b"forged".to_vec());
    let code = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/tmp"),
        Some(forged),
    ))
    .await?;

    assert_eq!(code, AUTHORIZATION_FAILED_EXIT_CODE);
    assert_eq!(s.backend.spawn_count(), 0);
    assert!(s.sink.text(StreamKind::Stderr).contains("denied"));
    Ok(())
}

#[tokio::test]
async fn missing_token_for_authorized_command_is_denied() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let code =
        with_timeout(conn.run_command(CommandId::LsAuthorized, path_arg("/tmp"), None)).await?;
    assert_eq!(code, AUTHORIZATION_FAILED_EXIT_CODE);
    assert_eq!(s.backend.spawn_count(), 0);
    assert_eq!(s.authority.evaluations(), 0);
    Ok(())
}

#[tokio::test]
async fn scripted_denial_yields_sentinel() -> TestResult {
    let s = setup(Script::Deny, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/tmp"),
        Some(s.mint()),
    ))
    .await?;
    assert_eq!(code, AUTHORIZATION_FAILED_EXIT_CODE);
    assert_eq!(s.backend.spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn authority_failure_is_distinct_from_denial() -> TestResult {
    let s = setup(Script::Fail(AuthorityError::Canceled), RecordingBackend::new())?;
    let conn = s.connect().await?;

    let result = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/tmp"),
        Some(s.mint()),
    ))
    .await;

    match result {
        Err(HelperError::Remote(err)) => assert_eq!(err.kind, RemoteErrorKind::Authorization),
        other => panic!("expected authorization subsystem error, got {other:?}"),
    }
    assert_eq!(s.backend.spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn open_command_runs_without_token() -> TestResult {
    let backend = RecordingBackend::new()
        .with_output(StreamKind::Stdout, "alpha\n")
        .with_output(StreamKind::Stderr, "warning\n")
        .with_exit_code(0);
    let s = setup(Script::Deny, backend)?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_command(CommandId::Ls, path_arg("/var/db/sudo"), None)).await?;

    assert_eq!(code, 0);
    assert_eq!(s.authority.evaluations(), 0);
    let spawned = s.backend.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].executable, "/bin/ls");
    assert_eq!(spawned[0].args, path_arg("/var/db/sudo"));

    // Log events arrive before the reply.
    assert_eq!(s.sink.text(StreamKind::Stdout), "alpha\n");
    assert_eq!(s.sink.text(StreamKind::Stderr), "warning\n");
    Ok(())
}

#[tokio::test]
async fn granted_command_returns_process_exit_code() -> TestResult {
    let backend = RecordingBackend::new().with_exit_code(2);
    let s = setup(Script::Grant, backend)?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/nonexistent/path"),
        Some(s.mint()),
    ))
    .await?;
    assert_eq!(code, 2);
    assert_eq!(s.backend.spawn_count(), 1);
    assert_eq!(s.authority.evaluations(), 1);
    Ok(())
}

#[tokio::test]
async fn bad_arguments_are_rejected_before_authorization() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let result = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("-la"),
        Some(s.mint()),
    ))
    .await;
    match result {
        Err(HelperError::Remote(err)) => assert_eq!(err.kind, RemoteErrorKind::InvalidRequest),
        other => panic!("expected invalid request, got {other:?}"),
    }

    let wrong_arity = with_timeout(conn.run_command(CommandId::Ls, vec![], None)).await;
    assert!(matches!(
        wrong_arity,
        Err(HelperError::Remote(ref err)) if err.kind == RemoteErrorKind::InvalidRequest
    ));

    assert_eq!(s.authority.evaluations(), 0);
    assert_eq!(s.backend.spawn_count(), 0);
    Ok(())
}

#[tokio::test]
async fn uninstall_is_not_a_runnable_command() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let result =
        with_timeout(conn.run_command(CommandId::Uninstall, vec![], Some(s.mint()))).await;
    assert!(matches!(
        result,
        Err(HelperError::Remote(ref err)) if err.kind == RemoteErrorKind::InvalidRequest
    ));
    Ok(())
}

#[tokio::test]
async fn spawn_failure_is_reported_as_spawn_error() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new().failing_spawn())?;
    let conn = s.connect().await?;

    let result = with_timeout(conn.run_command(CommandId::Ls, path_arg("/tmp"), None)).await;
    match result {
        Err(HelperError::Spawn(message)) => assert!(message.contains("/bin/ls"), "{message}"),
        other => panic!("expected spawn error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn token_is_minted_for_the_connected_uid() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let conn = s.connect().await?;

    let token = with_timeout(conn.create_token()).await?;
    assert_eq!(s.authority.minted_for(), vec![current_subject().uid]);

    let code = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/tmp"),
        Some(token),
    ))
    .await?;
    assert_eq!(code, 0);
    assert_eq!(s.backend.spawn_count(), 1);
    Ok(())
}

/// Worker backed by the file authority, with `ls-authorized` open to the
/// current group.
fn local_worker(
    env: &TestEnv,
    backend: &RecordingBackend,
) -> Result<WorkerHarness, Box<dyn std::error::Error>> {
    env.write_right(
        "io.privhelper.test.ls-authorized",
        RuleClass::User,
        &current_group_name(),
        0,
    );
    let authority = LocalAuthority::new(&env.config.authority.rights_path);
    Ok(start_worker(
        &env.config,
        Arc::new(authority),
        Arc::new(backend.clone()),
        Arc::new(AcceptAll),
    )?)
}

#[tokio::test]
async fn hand_built_tokens_are_refused_by_the_file_authority() -> TestResult {
    init_tracing();
    let env = TestEnv::new();
    let backend = RecordingBackend::new();
    let worker = local_worker(&env, &backend)?;
    let conn = HelperConnection::connect(&worker.socket_path, Arc::new(RecordingSink::new())).await?;

    let uid = current_subject().uid.to_le_bytes();
    let mut unsigned = vec![1u8];
    unsigned.extend_from_slice(&uid);
    unsigned.extend_from_slice(&[0xAB; 16]);
    let mut bad_mac = vec![2u8];
    bad_mac.extend_from_slice(&uid);
    bad_mac.extend_from_slice(&[0x5A; 16]);
    bad_mac.extend_from_slice(&[0u8; 32]);

    for forged in [unsigned, bad_mac] {
        let code = with_timeout(conn.run_command(
            CommandId::LsAuthorized,
            path_arg("/tmp"),
            Some(AuthorizationToken::from_bytes(forged)),
        ))
        .await?;
        assert_eq!(code, AUTHORIZATION_FAILED_EXIT_CODE);
    }
    assert_eq!(backend.spawn_count(), 0);

    // A token the worker issued over the same connection is accepted.
    let issued = with_timeout(conn.create_token()).await?;
    let code = with_timeout(conn.run_command(
        CommandId::LsAuthorized,
        path_arg("/tmp"),
        Some(issued),
    ))
    .await?;
    assert_eq!(code, 0);
    assert_eq!(backend.spawn_count(), 1);
    Ok(())
}

#[tokio::test]
async fn abandoned_call_leaves_no_pending_entry() -> TestResult {
    init_tracing();
    let env = TestEnv::new();
    let backend = Arc::new(SlowBackend {
        marker: env.path("finished"),
    });
    let worker = start_worker(
        &env.config,
        Arc::new(FakeAuthority::granting()),
        backend,
        Arc::new(AcceptAll),
    )?;
    let conn = HelperConnection::connect(&worker.socket_path, Arc::new(RecordingSink::new())).await?;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        conn.run_command(CommandId::Ls, path_arg("/tmp"), None),
    )
    .await;
    assert!(abandoned.is_err(), "slow command finished early");
    assert_eq!(conn.pending_calls(), 0);

    // The late reply is discarded and the connection keeps working.
    assert_eq!(with_timeout(conn.get_version()).await?, HelperVersion::bundled());
    assert_eq!(conn.pending_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn replies_follow_request_order() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new().with_exit_code(5))?;
    let conn = s.connect().await?;

    let (a, b, c) = with_timeout(async {
        tokio::join!(
            conn.run_command(CommandId::Ls, path_arg("/a"), None),
            conn.get_version(),
            conn.run_command(CommandId::Ls, path_arg("/b"), None),
        )
    })
    .await;
    assert_eq!(a?, 5);
    assert_eq!(b?, HelperVersion::bundled());
    assert_eq!(c?, 5);
    assert_eq!(s.backend.spawn_count(), 2);
    Ok(())
}

fn install_files(env: &TestEnv) -> Result<(), std::io::Error> {
    let install = &env.config.install;
    fs::create_dir_all(install.executable_path.parent().unwrap())?;
    fs::create_dir_all(install.descriptor_path.parent().unwrap())?;
    fs::write(&install.executable_path, "#!/bin/sh\n")?;
    fs::write(&install.descriptor_path, "label = \"x\"\n")?;
    Ok(())
}

#[tokio::test]
async fn uninstall_removes_files_and_stops_worker() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    install_files(&s.env)?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_uninstall(s.mint())).await?;
    assert_eq!(code, 0);
    assert!(!s.env.config.install.executable_path.exists());
    assert!(!s.env.config.install.descriptor_path.exists());

    with_timeout(s.worker.join).await??;
    assert!(s.worker.handle.should_quit());
    assert!(!s.worker.socket_path.exists());
    Ok(())
}

#[tokio::test]
async fn partial_uninstall_reports_failure_and_keeps_running() -> TestResult {
    let s = setup(Script::Grant, RecordingBackend::new())?;
    let install = &s.env.config.install;
    fs::create_dir_all(install.executable_path.parent().unwrap())?;
    fs::write(&install.executable_path, "#!/bin/sh\n")?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_uninstall(s.mint())).await?;
    assert_eq!(code, UNINSTALL_FAILED_EXIT_CODE);
    assert!(!install.executable_path.exists());
    assert!(!s.worker.handle.should_quit());
    assert!(s.sink.text(StreamKind::Stderr).contains("Failed to remove"));

    // The connection is still usable.
    assert_eq!(with_timeout(conn.get_version()).await?, HelperVersion::bundled());
    Ok(())
}

#[tokio::test]
async fn denied_uninstall_leaves_files_in_place() -> TestResult {
    let s = setup(Script::Deny, RecordingBackend::new())?;
    install_files(&s.env)?;
    let conn = s.connect().await?;

    let code = with_timeout(conn.run_uninstall(s.mint())).await?;
    assert_eq!(code, AUTHORIZATION_FAILED_EXIT_CODE);
    assert!(s.env.config.install.executable_path.exists());
    assert!(s.env.config.install.descriptor_path.exists());
    assert!(!s.worker.handle.should_quit());
    Ok(())
}

#[tokio::test]
async fn disconnect_mid_command_kills_the_child() -> TestResult {
    init_tracing();
    let env = TestEnv::new();
    let marker = env.path("still-running");
    let authority = Arc::new(FakeAuthority::granting());

    // Slow child that leaves a marker unless it is killed first.
    let backend = Arc::new(SlowBackend {
        marker: marker.clone(),
    });
    let worker = start_worker(&env.config, authority, backend, Arc::new(AcceptAll))?;

    let sink = Arc::new(RecordingSink::new());
    let conn = HelperConnection::connect(&worker.socket_path, sink).await?;
    let call = tokio::spawn(async move {
        let _ = conn.run_command(CommandId::Ls, path_arg("/tmp"), None).await;
        conn
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    call.abort();
    let _ = call.await;

    // Last connection gone: worker exits, and the child never wrote the marker.
    with_timeout(worker.join).await??;
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!marker.exists());
    Ok(())
}

/// Runs `sleep 1; touch <marker>` through the real process runner.
struct SlowBackend {
    marker: std::path::PathBuf,
}

impl privhelper::exec::ExecutorBackend for SlowBackend {
    fn run(
        &self,
        mut request: privhelper::exec::ExecRequest,
        sink: tokio::sync::mpsc::Sender<privhelper::exec::OutputEvent>,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> privhelper::exec::backend::ExecFuture<'_> {
        request.executable = "/bin/sh".to_string();
        request.args = vec![
            "-c".to_string(),
            format!("sleep 1; touch '{}'", self.marker.display()),
        ];
        Box::pin(async move { privhelper::exec::run_process(&request, sink, cancel).await })
    }
}
