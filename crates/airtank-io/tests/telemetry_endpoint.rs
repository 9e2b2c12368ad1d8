use airtank_core::{
    CompressorController, ControllerConfig, ManualClock, SchedulingMode, ScriptedIo, SharedConfig,
};
use airtank_io::telemetry::{render, Route, TelemetryServer};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const START: u64 = 1_700_000_000;

fn controller(mode: SchedulingMode) -> (Arc<CompressorController<ScriptedIo, ManualClock>>, ManualClock) {
    let clock = ManualClock::new(START);
    let config = SharedConfig::new(ControllerConfig {
        pressure_change_duration_secs: 0,
        log_interval_secs: 1,
        ..ControllerConfig::default()
    });
    let controller = CompressorController::new(ScriptedIo::default(), config, clock.clone(), mode);
    (Arc::new(controller), clock)
}

#[tokio::test]
async fn status_reflects_controller_state() {
    let (c, clock) = controller(SchedulingMode::Cooperative);
    c.with_io(|io| io.set_tank_pressure(80.0));
    c.enable(None);
    c.update();
    clock.advance(5);

    let reply = render(&c, Route::Status).await.unwrap();
    assert_eq!(reply.status, 200);
    let doc: Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(doc["type"], "status");
    assert_eq!(doc["protocol_version"]["major"], 1);
    assert_eq!(doc["motor_state"], "run");
    assert_eq!(doc["compressor_enabled"], true);
    assert_eq!(doc["system_time"], START + 5);
    assert_eq!(doc["state_tag"], "OR_");
}

#[tokio::test]
async fn activity_logs_respect_since_in_both_modes() {
    for mode in [SchedulingMode::Cooperative, SchedulingMode::Preemptive] {
        let (c, clock) = controller(mode);
        c.with_io(|io| io.set_tank_pressure(80.0));
        c.enable(None);
        c.update();
        clock.advance(10);
        c.pause();
        clock.advance(10);
        c.request_run();
        c.update();

        let reply = render(&c, Route::ActivityLogs { since: START + 15 })
            .await
            .unwrap();
        let doc: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(doc["time"], START + 20);
        let activity = doc["activity"].as_array().unwrap();
        assert_eq!(activity.len(), 1, "only the open run ends after since");
        assert!(activity[0]["stop"].is_null());
        let commands: Vec<_> = doc["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["command"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(commands, vec!["run"]);
    }
}

#[tokio::test]
async fn state_logs_carry_max_duration() {
    let (c, clock) = controller(SchedulingMode::Cooperative);
    c.with_io(|io| io.set_tank_pressure(100.0));
    for _ in 0..3 {
        c.update();
        clock.advance(1);
    }
    let reply = render(&c, Route::StateLogs { since: 0 }).await.unwrap();
    let doc: Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(doc["maxDuration"], 200);
    assert_eq!(doc["state"].as_array().unwrap().len(), 3);
    assert_eq!(doc["state"][0]["time"], START + 2);
}

#[tokio::test]
async fn unknown_paths_and_bad_queries() {
    let (c, _) = controller(SchedulingMode::Cooperative);
    assert_eq!(render(&c, Route::parse("/nope")).await.unwrap().status, 404);
    assert_eq!(
        render(&c, Route::parse("/state_logs?since=abc")).await.unwrap().status,
        400
    );
    assert_eq!(render(&c, Route::Ready).await.unwrap().status, 503);
    c.update();
    assert_eq!(render(&c, Route::Ready).await.unwrap().status, 200);
}

#[tokio::test]
async fn serves_health_over_http() {
    let (c, _) = controller(SchedulingMode::Cooperative);
    let server = TelemetryServer::bind("127.0.0.1:0").unwrap();
    let addr = server.addr().to_string();
    let stop = Arc::new(AtomicBool::new(false));

    let client = {
        let stop = Arc::clone(&stop);
        async move {
            let mut stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
            stream
                .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
                .await
                .unwrap()
                .unwrap();
            stop.store(true, Ordering::Relaxed);
            response
        }
    };

    let ((), response) = tokio::join!(server.serve(Arc::clone(&c), Arc::clone(&stop)), client);
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with("OK"));
}
