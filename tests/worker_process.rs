mod common;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use common::{init_tracing, with_timeout, TestResult};
use privhelper::authority::LocalAuthority;
use privhelper::identity::executable_digest;
use privhelper::registry::{CommandId, RuleClass};
use privhelper::types::{HelperVersion, StreamKind};
use privhelper_test_utils::builders::{current_group_name, TestEnv};
use privhelper_test_utils::fake_authority::CountingPrompter;
use privhelper_test_utils::fake_install::FakeInstallService;
use privhelper_test_utils::harness::prompting_controller;
use privhelper_test_utils::recording_sink::RecordingSink;
use tokio::process::Command;

/// Config file pointing the real worker at `env`, trusting this test binary.
fn write_worker_config(env: &TestEnv) -> Result<std::path::PathBuf, Box<dyn std::error::Error>> {
    let cfg = &env.config;
    let client_digest = executable_digest(&std::env::current_exe()?)?;
    let contents = format!(
        r#"
[helper]
service_name = "{service}"
socket_path = "{socket}"
poll_interval = "50ms"

[install]
executable_path = "{exe}"
descriptor_path = "{descriptor}"

[authority]
rights_path = "{rights}"
key_path = "{key}"
interactive = true

[identity]
trusted_digests = ["{client_digest}"]
"#,
        service = cfg.helper.service_name,
        socket = cfg.helper.socket_path.display(),
        exe = cfg.install.executable_path.display(),
        descriptor = cfg.install.descriptor_path.display(),
        rights = cfg.authority.rights_path.display(),
        key = cfg.authority.key_path.display(),
    );
    let path = env.path("privhelper.toml");
    fs::write(&path, contents)?;
    Ok(path)
}

// Under a service manager the worker has no terminal: stdin is closed and
// nothing may be asked there. Confirmation happens in the client.
#[tokio::test]
async fn worker_serves_authorized_commands_with_stdin_closed() -> TestResult {
    init_tracing();
    let env = TestEnv::new();
    env.write_right(
        "io.privhelper.test.ls-authorized",
        RuleClass::User,
        &current_group_name(),
        0,
    );
    let config_path = write_worker_config(&env)?;

    let mut worker = Command::new(env!("CARGO_BIN_EXE_privhelper"))
        .arg("--config")
        .arg(&config_path)
        .arg("worker")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let socket = env.config.helper.socket_path.clone();
    with_timeout(async {
        while !socket.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let key_mode = fs::metadata(&env.config.authority.key_path)?.permissions().mode();
    assert_eq!(key_mode & 0o777, 0o600);

    let listed = env.path("listed");
    fs::create_dir(&listed)?;
    fs::write(listed.join("entry.txt"), "x")?;

    let prompter = Arc::new(CountingPrompter::answering(true));
    let sink = Arc::new(RecordingSink::new());
    let ctl = prompting_controller(
        &env.config,
        Arc::new(LocalAuthority::new(&env.config.authority.rights_path)),
        Arc::new(FakeInstallService::new(HelperVersion::bundled())),
        sink.clone(),
        prompter.clone(),
    )?;
    let before = prompter.asked();

    let token = with_timeout(ctl.authorize()).await?;
    for _ in 0..2 {
        let code = with_timeout(ctl.run_command(
            CommandId::LsAuthorized,
            vec![listed.display().to_string()],
            Some(token.clone()),
        ))
        .await?;
        assert_eq!(code, 0);
    }
    assert!(sink.text(StreamKind::Stdout).contains("entry.txt"));
    assert_eq!(prompter.asked() - before, 1);

    // Last connection gone: the worker exits on its own.
    drop(ctl);
    let status = with_timeout(worker.wait()).await?;
    assert!(status.success(), "worker exited with {status}");
    assert!(!socket.exists());
    Ok(())
}
