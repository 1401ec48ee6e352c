use cf_tunnel::backend::mock::{CallLog, MockDnsApi, MockTunnelTool};
use cf_tunnel::backend::runner::TunnelRunner;
use cf_tunnel::backend::shutdown::{ShutdownReason, watch_process_exit};
use cf_tunnel::backend::types::{IngressRule, TunnelSpec};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn scenario_spec(dir: &TempDir) -> TunnelSpec {
    TunnelSpec {
        name: "t1".to_string(),
        credentials_dir: dir.path().to_path_buf(),
        auth_token: "tok".to_string(),
        ingress: vec![IngressRule::new("a.example.com", "http://localhost:3000")],
        remove_existing_tunnel: false,
        remove_existing_dns: false,
    }
}

fn logged_in_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cert.pem"), "cert").unwrap();
    dir
}

#[tokio::test]
async fn test_fresh_tunnel_call_order() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()));
    let dns = Arc::new(MockDnsApi::new(log.clone()).with_zone("example.com", "zone-1"));
    let runner = TunnelRunner::new(tool.clone(), dns);
    let spec = scenario_spec(&dir);

    let provisioned = runner.provision(&spec).await.unwrap();
    assert!(provisioned.config_path.exists());
    assert_eq!(provisioned.config_path, dir.path().join("config.yml"));

    let coordinator = runner.launch(&spec, &provisioned).await.unwrap();

    assert_eq!(
        log.entries(),
        vec![
            "zone lookup example.com",
            "dns lookup a.example.com",
            "tunnel list",
            "tunnel create t1",
            "tunnel route dns t1 a.example.com",
            "tunnel list",
            "tunnel run t1",
        ]
    );

    let report = coordinator
        .shutdown(ShutdownReason::Interrupt)
        .await
        .unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[tokio::test]
async fn test_login_runs_before_reconciliation() {
    let dir = TempDir::new().unwrap();
    let log = CallLog::default();
    let runner = TunnelRunner::new(
        Arc::new(MockTunnelTool::new(log.clone())),
        Arc::new(MockDnsApi::new(log.clone())),
    );

    runner.provision(&scenario_spec(&dir)).await.unwrap();

    assert_eq!(log.position("tunnel login"), Some(0));
}

#[tokio::test]
async fn test_shutdown_removes_everything_provisioned() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()));
    let dns = Arc::new(
        MockDnsApi::new(log.clone())
            .with_zone("example.com", "zone-1")
            .with_record("zone-1", "other.example.com", "rec-other"),
    );
    let runner = TunnelRunner::new(tool.clone(), dns.clone());
    let spec = scenario_spec(&dir);

    let provisioned = runner.provision(&spec).await.unwrap();
    let coordinator = runner.launch(&spec, &provisioned).await.unwrap();
    let tunnel_id = provisioned.handle.id.clone();
    std::fs::write(dir.path().join(format!("{}.json", tunnel_id)), "{}").unwrap();

    let report = coordinator
        .shutdown(ShutdownReason::Terminate)
        .await
        .unwrap();

    assert_eq!(report.reason, ShutdownReason::Terminate);
    assert!(tool.tunnel_names().is_empty());
    assert!(!provisioned.config_path.exists());
    assert!(!dir.path().join(format!("{}.json", tunnel_id)).exists());
    assert_eq!(dns.record_ids(), vec!["rec-other"]);
    assert!(log.position("process interrupt").unwrap() < log.position("tunnel delete").unwrap());
}

#[tokio::test]
async fn test_teardown_failures_do_not_stop_later_steps() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()));
    let dns = Arc::new(
        MockDnsApi::new(log.clone())
            .with_zone("example.com", "zone-1")
            .failing_lookup("a.example.com"),
    );
    let runner = TunnelRunner::new(tool.clone(), dns);
    let mut spec = scenario_spec(&dir);
    spec.remove_existing_dns = true;

    // Pre-flight lookups fail too, so provision against a clean DNS mock.
    let clean = TunnelRunner::new(tool.clone(), Arc::new(MockDnsApi::new(log.clone())));
    let provisioned = clean.provision(&spec).await.unwrap();
    let coordinator = runner.launch(&spec, &provisioned).await.unwrap();

    let report = coordinator
        .shutdown(ShutdownReason::Interrupt)
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("a.example.com"));
    assert!(tool.tunnel_names().is_empty());
    assert!(!provisioned.config_path.exists());
}

#[tokio::test]
async fn test_teardown_reports_lookup_and_delete_failures() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()).failing_list());
    let dns = Arc::new(
        MockDnsApi::new(log.clone())
            .with_zone("example.com", "zone-1")
            .with_record("zone-1", "a.example.com", "rec-a")
            .with_record("zone-1", "b.example.com", "rec-b")
            .failing_delete("rec-a"),
    );
    let mut spec = scenario_spec(&dir);
    spec.ingress.push(IngressRule::new("b.example.com", "http://localhost:4000"));

    let clean = TunnelRunner::new(
        Arc::new(MockTunnelTool::new(log.clone())),
        Arc::new(MockDnsApi::new(log.clone())),
    );
    let provisioned = clean.provision(&spec).await.unwrap();
    let runner = TunnelRunner::new(tool, dns.clone());
    let coordinator = runner.launch(&spec, &provisioned).await.unwrap();

    let report = coordinator
        .shutdown(ShutdownReason::Terminate)
        .await
        .unwrap();

    assert_eq!(report.warnings.len(), 2, "{:?}", report.warnings);
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("Failed to delete DNS record for a.example.com"))
    );
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.contains("Failed to look up tunnel \"t1\""))
    );
    assert!(log.contains("dns delete rec-b"));
    assert_eq!(dns.record_ids(), vec!["rec-a"]);
    assert!(!provisioned.config_path.exists());
}

#[tokio::test]
async fn test_process_exit_and_signal_race_cleans_up_once() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()));
    let runner = TunnelRunner::new(tool.clone(), Arc::new(MockDnsApi::new(log.clone())));
    let spec = scenario_spec(&dir);

    let provisioned = runner.provision(&spec).await.unwrap();
    let coordinator = runner.launch(&spec, &provisioned).await.unwrap();
    let watcher = watch_process_exit(coordinator.clone());

    tool.last_process().unwrap().exit(Some(0));
    let signal = coordinator.shutdown(ShutdownReason::Interrupt).await;

    let report = coordinator.wait_for_completion().await.unwrap();
    watcher.await.unwrap();

    assert_eq!(log.count("tunnel delete"), 1);
    if signal.is_some() {
        assert_eq!(report.reason, ShutdownReason::Interrupt);
    } else {
        assert_eq!(report.reason, ShutdownReason::ProcessExited { code: Some(0) });
    }
}

#[tokio::test]
async fn test_run_returns_after_process_exits() {
    let dir = logged_in_dir();
    let log = CallLog::default();
    let tool = Arc::new(MockTunnelTool::new(log.clone()));
    let runner = Arc::new(
        TunnelRunner::new(tool.clone(), Arc::new(MockDnsApi::new(log.clone())))
            .with_grace_period(Duration::from_millis(100)),
    );
    let spec = scenario_spec(&dir);

    let run = {
        let runner = runner.clone();
        let spec = spec.clone();
        tokio::spawn(async move { runner.run(&spec).await })
    };

    let control = loop {
        if let Some(control) = tool.last_process() {
            break control;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    control.exit(Some(2));

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.reason, ShutdownReason::ProcessExited { code: Some(2) });
    assert!(tool.tunnel_names().is_empty());
    assert!(!dir.path().join("config.yml").exists());
}
