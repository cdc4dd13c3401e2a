//! Replay recorded relay traffic through an event manager
//!
//! Reads one plain-object auth event per line, delivers each through a
//! [`MemoryChannel`] to a manager built from configuration, and reports the
//! per-event verdicts, the redirect result, and every popup resolution.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::channel::{MemoryChannel, SignInChannel};
use crate::config::RelayConfig;
use crate::consumer::scripted::PopupResolution;
use crate::consumer::{Consumer, ScriptedConsumer};
use crate::error::{AuthError, AuthErrorCode, RelayError, Result};
use crate::event::{AuthEvent, AuthEventType, SignInOutcome};
use crate::manager::{ManagerKey, ManagerRegistry};
use crate::storage::{FileFlagStore, MemoryFlagStore, RedirectFlagStore};

/// How long to wait for popup finishers after the last event.
const POPUP_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Arguments for the replay command
#[derive(Debug, Clone, Default)]
pub struct ReplayArgs {
    /// JSON-lines event log
    pub events: PathBuf,
    /// Event types the replay consumer owns; every type when empty
    pub owner: Vec<AuthEventType>,
    /// Finisher failure code, if the finisher should fail
    pub finisher_error: Option<String>,
    /// User object returned by a successful finisher
    pub user: Option<serde_json::Value>,
}

/// Verdict for one line of the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    /// 1-based line number
    pub line: usize,
    /// Event type, absent for null events
    pub event_type: Option<AuthEventType>,
    /// Dedup identifier
    pub uid: Option<String>,
    /// Whether a consumer claimed the event
    pub claimed: bool,
}

/// Final state of the redirect slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RedirectReport {
    /// Resolved outcome
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SignInOutcome>,
    /// Rejection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthError>,
}

/// Everything the replay observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    /// Manager storage key
    pub key: String,
    /// Lines that were neither blank nor parseable events
    pub skipped_lines: Vec<usize>,
    /// One record per delivered event
    pub deliveries: Vec<DeliveryRecord>,
    /// Redirect slot after the replay
    pub redirect_result: RedirectReport,
    /// Popup outcomes reported to the consumer
    pub popup_results: Vec<PopupResolution>,
    /// Number of finisher invocations
    pub finisher_calls: usize,
}

/// Run the replay command and print the report as JSON
///
/// # Errors
///
/// Returns an error if the log cannot be read, the flag store cannot be
/// opened, or the channel fails to initialize.
pub async fn run_replay(config: &RelayConfig, args: ReplayArgs) -> Result<()> {
    let report = replay_events(config, &args).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn flag_store(config: &RelayConfig) -> Result<Arc<dyn RedirectFlagStore>> {
    let store: Arc<dyn RedirectFlagStore> = match &config.storage.flag_dir {
        Some(dir) => Arc::new(FileFlagStore::new(dir.clone())?),
        None => Arc::new(MemoryFlagStore::new()),
    };
    Ok(store)
}

fn finisher_response(args: &ReplayArgs) -> std::result::Result<SignInOutcome, AuthError> {
    match &args.finisher_error {
        Some(code) => Err(AuthError::new(AuthErrorCode::parse(code))),
        None => Ok(SignInOutcome::with_user(
            args.user
                .clone()
                .unwrap_or_else(|| serde_json::json!({ "uid": "replay-user" })),
        )),
    }
}

/// Replay the log and collect a [`ReplayReport`]
///
/// # Errors
///
/// See [`run_replay`].
pub async fn replay_events(config: &RelayConfig, args: &ReplayArgs) -> Result<ReplayReport> {
    let contents = tokio::fs::read_to_string(&args.events).await.map_err(|e| {
        RelayError::Config(format!(
            "Failed to read event log {}: {}",
            args.events.display(),
            e
        ))
    })?;

    let channel = MemoryChannel::new();
    let registry = ManagerRegistry::new(
        {
            let channel = channel.clone();
            Arc::new(move |_key: &ManagerKey| Arc::new(channel.clone()) as Arc<dyn SignInChannel>)
        },
        flag_store(config)?,
        config.manager_options()?,
    );
    let manager = registry.get_or_create(&config.manager_key());

    let owned = if args.owner.is_empty() {
        AuthEventType::ALL.to_vec()
    } else {
        args.owner.clone()
    };
    let consumer = Arc::new(ScriptedConsumer::new(owned).finishing_with(finisher_response(args)));
    manager.subscribe(Arc::clone(&consumer) as Arc<dyn Consumer>).await;
    manager.initialize().await.map_err(RelayError::Channel)?;

    let mut skipped_lines = Vec::new();
    let mut deliveries = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: serde_json::Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(line = line_no, "Skipping unparseable line: {e}");
                skipped_lines.push(line_no);
                continue;
            }
        };

        let event = if raw.is_null() {
            None
        } else {
            match AuthEvent::from_plain_object(&raw) {
                Some(event) => Some(event),
                None => {
                    tracing::warn!(line = line_no, "Skipping line that is not an auth event");
                    skipped_lines.push(line_no);
                    continue;
                }
            }
        };

        let event_type = event.as_ref().map(|e| e.event_type);
        let uid = event.as_ref().and_then(|e| e.uid()).map(str::to_string);
        let claimed = channel.emit_raw(event).await?;
        tracing::debug!(line = line_no, ?event_type, claimed, "Replayed event");
        deliveries.push(DeliveryRecord {
            line: line_no,
            event_type,
            uid,
            claimed,
        });
    }

    let expected_popups = deliveries
        .iter()
        .filter(|d| d.claimed && d.event_type.is_some_and(AuthEventType::is_popup))
        .count();
    let popup_results = match tokio::time::timeout(
        POPUP_SETTLE_TIMEOUT,
        consumer.wait_for_popup_results(expected_popups),
    )
    .await
    {
        Ok(results) => results,
        Err(_) => {
            tracing::warn!(expected_popups, "Popup finishers did not settle in time");
            consumer.popup_results()
        }
    };

    let redirect_result = match manager.get_redirect_result().await {
        Ok(outcome) => RedirectReport {
            outcome: Some(outcome),
            error: None,
        },
        Err(error) => RedirectReport {
            outcome: None,
            error: Some(error),
        },
    };

    Ok(ReplayReport {
        key: manager.key().to_string(),
        skipped_lines,
        deliveries,
        redirect_result,
        popup_results,
        finisher_calls: consumer.finisher_calls(),
    })
}
