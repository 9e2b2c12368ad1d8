//! Wire shapes of the telemetry documents.
//!
//! Log documents wrap the streamed ring-log exports:
//!
//! ```text
//! {"time":T,"activity":[...events...],"commands":[...commands...]}
//! {"time":T,"maxDuration":D,"state":[...states...]}
//! ```

use airtank_core::{
    CommandLog, EventLog, ExportError, ExportPolicy, StateLog, StateView, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn v1() -> Self {
        Self { major: 1, minor: 0 }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }
}

#[derive(Debug, Serialize)]
pub struct StatusMsg<'a> {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub protocol_version: ProtocolVersion,
    #[serde(flatten)]
    pub state: &'a StateView,
}

impl<'a> StatusMsg<'a> {
    pub fn new(state: &'a StateView) -> Self {
        Self {
            msg_type: "status",
            protocol_version: ProtocolVersion::v1(),
            state,
        }
    }
}

/// Event entries that ended at or after `since`, then commands issued at or
/// after `since`.
pub async fn activity_logs_document(
    events: &EventLog,
    commands: &CommandLog,
    now: Timestamp,
    since: Timestamp,
    policy: ExportPolicy,
) -> Result<Vec<u8>, ExportError> {
    let mut body = Vec::with_capacity(1024);
    write!(body, r#"{{"time":{now},"activity":["#)?;
    events
        .ring()
        .export_with(&mut body, since, |entry| entry.stop, policy)
        .await?;
    body.extend_from_slice(br#"],"commands":["#);
    commands
        .ring()
        .export_with(&mut body, since, |entry| entry.time, policy)
        .await?;
    body.extend_from_slice(b"]}");
    Ok(body)
}

/// State snapshots logged at or after `since`.
pub async fn state_logs_document(
    states: &StateLog,
    now: Timestamp,
    since: Timestamp,
    log_interval: u64,
    policy: ExportPolicy,
) -> Result<Vec<u8>, ExportError> {
    let mut body = Vec::with_capacity(4096);
    write!(
        body,
        r#"{{"time":{now},"maxDuration":{},"state":["#,
        states.max_duration(log_interval)
    )?;
    states
        .ring()
        .export_with(&mut body, since, |entry| entry.time, policy)
        .await?;
    body.extend_from_slice(b"]}");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airtank_core::{CommandKind, EventKind, LockMode, StateLogEntry, StateTag};
    use serde_json::Value;

    #[tokio::test]
    async fn activity_document_filters_both_logs() {
        let events = EventLog::new(8, LockMode::Threaded);
        let commands = CommandLog::new(8, LockMode::Threaded);
        events.open(EventKind::Run, 10);
        events.close(20);
        events.open(EventKind::Purge, 40);
        commands.log_command(CommandKind::On, 5);
        commands.log_command(CommandKind::Purge, 40);

        for policy in [ExportPolicy::Blocking, ExportPolicy::Yielding] {
            let body = activity_logs_document(&events, &commands, 50, 30, policy)
                .await
                .unwrap();
            let doc: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(doc["time"], 50);
            assert_eq!(doc["activity"].as_array().unwrap().len(), 1);
            assert_eq!(doc["activity"][0]["kind"], "purge");
            assert!(doc["activity"][0]["stop"].is_null());
            assert_eq!(doc["commands"].as_array().unwrap().len(), 1);
            assert_eq!(doc["commands"][0]["command"], "purge");
        }
    }

    #[tokio::test]
    async fn state_document_reports_max_duration() {
        let states = StateLog::new(20, LockMode::Threaded);
        states.log_state(
            StateLogEntry {
                time: 100,
                tank_pressure: None,
                line_pressure: Some(88.5),
                duty: 0.25,
                state: StateTag(*b"Os_"),
            },
            10,
        );
        let body = state_logs_document(&states, 105, 0, 10, ExportPolicy::Blocking)
            .await
            .unwrap();
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["maxDuration"], 200);
        assert!(doc["state"][0]["tank_pressure"].is_null());
        assert_eq!(doc["state"][0]["line_pressure"], 88.5);
        assert_eq!(doc["state"][0]["state"], "Os_");
    }

    #[test]
    fn only_major_version_one_is_supported() {
        assert!(ProtocolVersion::v1().is_supported());
        assert!(!ProtocolVersion { major: 2, minor: 0 }.is_supported());
    }
}
