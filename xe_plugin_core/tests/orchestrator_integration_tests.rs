#![cfg(unix)]

use std::fs;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use xe_plugin_core::{
    config::{CacheConfig, ToolConfig},
    registry::{LocalPluginHost, PluginHost},
    Config, Error, OperationStatus, Orchestrator, ReasonCode,
};

fn project(script: &str) -> (TempDir, Config) {
    let dir = tempdir().unwrap();
    let mut config = Config {
        project_root: dir.path().to_path_buf(),
        tool: ToolConfig {
            command: vec![
                "sh".into(),
                "-c".into(),
                script.into(),
                "dependency-tool".into(),
            ],
            ..ToolConfig::default()
        },
        cache: CacheConfig {
            command: vec!["true".into()],
        },
        ..Config::default()
    }
    .resolve();
    config.operation.time_limit = 1;

    fs::create_dir_all(config.catalog.parent().unwrap()).unwrap();
    fs::write(
        &config.catalog,
        r#"{"plugins": [
            {"id": "board", "name": "xpressengine-plugin/board", "title": "Board",
             "latest_release": {"version": "1.1.0"}}
        ]}"#,
    )
    .unwrap();
    (dir, config)
}

fn write_manifest(config: &Config, id: &str, version: &str) {
    let dir = config.plugins_dir.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("plugin.toml"),
        format!("name = \"xpressengine-plugin/{}\"\nversion = \"{}\"\n", id, version),
    )
    .unwrap();
}

#[tokio::test]
async fn test_update_flow_with_real_processes() {
    let script = r#"echo "updating $*"
printf 'name = "xpressengine-plugin/board"\nversion = "1.1.0"\n' > plugins/board/plugin.toml"#;
    let (_dir, config) = project(script);
    write_manifest(&config, "board", "1.0.0");

    let host = LocalPluginHost::new(&config.plugins_dir, &config.activation_file);
    host.refresh().await.unwrap();
    host.activate("board").await.unwrap();

    let orchestrator = Orchestrator::from_config(&config).await.unwrap();
    let outcome = orchestrator.install_or_update(&["board"]).await.unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.changed().updated["board"], "1.1.0");

    orchestrator.apply_changes(&outcome).await.unwrap();
    host.refresh().await.unwrap();
    let record = host.activation("board").unwrap();
    assert_eq!(record.version, "1.1.0");
    assert!(record.updated_at.is_some());

    let log = fs::read_to_string(outcome.state().log.as_ref().unwrap()).unwrap();
    assert!(log.contains("updating update --with-dependencies"));
    assert!(log.contains("xpressengine-plugin/board"));
}

#[tokio::test]
async fn test_detached_run_hits_the_deadline() {
    let (_dir, config) = project("exec sleep 30");
    let orchestrator = Orchestrator::from_config(&config)
        .await
        .unwrap()
        .with_interactive(false);

    let started = std::time::Instant::now();
    let outcome = orchestrator.install_or_update(&["board"]).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(outcome.status(), OperationStatus::Failed);
    assert_eq!(outcome.failed().install["board"], ReasonCode::Timeout);

    let state = orchestrator.status().await.unwrap();
    assert!(state.expires_at.is_some());
    assert!(!state.is_expired(chrono::Utc::now()));
}

#[tokio::test]
async fn test_missing_tool_is_recorded_as_failed() {
    let (_dir, mut config) = project("");
    config.tool.command = vec!["/nonexistent/dependency-tool".into()];
    let orchestrator = Orchestrator::from_config(&config).await.unwrap();

    let result = orchestrator.install_or_update(&["board"]).await;
    assert!(matches!(result, Err(Error::Spawn { .. })));

    let state = orchestrator.status().await.unwrap();
    assert_eq!(state.status, OperationStatus::Failed);
    assert!(state.reason.unwrap().contains("Failed to spawn"));
}

#[tokio::test]
async fn test_detached_run_survives_a_hangup() {
    let script = r#"sleep 1
mkdir -p plugins/board
printf 'name = "xpressengine-plugin/board"\nversion = "1.1.0"\n' > plugins/board/plugin.toml"#;
    let (_dir, mut config) = project(script);
    config.operation.time_limit = 30;
    let orchestrator = Orchestrator::from_config(&config)
        .await
        .unwrap()
        .with_interactive(false);

    let state_file = config.state_file.clone();
    let hangup = tokio::spawn(async move {
        loop {
            if let Ok(raw) = tokio::fs::read_to_string(&state_file).await {
                if raw.contains("\"running\"") {
                    unsafe {
                        libc::raise(libc::SIGHUP);
                    }
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let outcome = orchestrator.install_or_update(&["board"]).await.unwrap();
    hangup.await.unwrap();

    assert!(outcome.succeeded());
    assert_eq!(outcome.changed().installed["board"], "1.1.0");
    let state = orchestrator.status().await.unwrap();
    assert!(state.status.is_terminal());
    assert_eq!(state.status, OperationStatus::Succeeded);
}

#[tokio::test]
async fn test_deadline_takes_down_forked_children() {
    let (dir, config) = project("(sleep 3; touch leaked) & wait");
    let orchestrator = Orchestrator::from_config(&config)
        .await
        .unwrap()
        .with_interactive(false);

    let started = std::time::Instant::now();
    let outcome = orchestrator.install_or_update(&["board"]).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.failed().install["board"], ReasonCode::Timeout);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!dir.path().join("leaked").exists());
}
