//! Durable emergency stop.
//!
//! Two states, ACTIVE (halted) and INACTIVE. The record lives in a small
//! `key=value` file replaced atomically (write `.tmp`, then rename), with
//! every transition appended to a JSON-lines audit log next to it.
//!
//! Reads fail closed: a missing or empty record is a first run (INACTIVE),
//! anything unreadable or corrupt is ACTIVE with reason SYSTEM_ERROR.
//! Deactivation must name an operator and a justification.

use crate::types::Timestamp;
use chrono::DateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSwitchParams {
    pub state_path: PathBuf,
    /// Trip the switch when the gate reports a circuit breaker.
    pub auto_activate_on_circuit_breaker: bool,
}

impl Default for KillSwitchParams {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from("data/kill_switch.state"),
            auto_activate_on_circuit_breaker: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchState {
    Active,
    Inactive,
}

impl KillSwitchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSwitchState::Active => "ACTIVE",
            KillSwitchState::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for KillSwitchState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(KillSwitchState::Active),
            "INACTIVE" => Ok(KillSwitchState::Inactive),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillReason {
    Manual,
    CircuitBreaker,
    RiskLimit,
    SystemError,
    ExchangeError,
    AuthFailure,
}

impl KillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillReason::Manual => "MANUAL",
            KillReason::CircuitBreaker => "CIRCUIT_BREAKER",
            KillReason::RiskLimit => "RISK_LIMIT",
            KillReason::SystemError => "SYSTEM_ERROR",
            KillReason::ExchangeError => "EXCHANGE_ERROR",
            KillReason::AuthFailure => "AUTH_FAILURE",
        }
    }
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KillReason {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(KillReason::Manual),
            "CIRCUIT_BREAKER" => Ok(KillReason::CircuitBreaker),
            "RISK_LIMIT" => Ok(KillReason::RiskLimit),
            "SYSTEM_ERROR" => Ok(KillReason::SystemError),
            "EXCHANGE_ERROR" => Ok(KillReason::ExchangeError),
            "AUTH_FAILURE" => Ok(KillReason::AuthFailure),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchRecord {
    pub state: KillSwitchState,
    pub reason: Option<KillReason>,
    pub message: String,
    pub operator: Option<String>,
    pub activated_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl KillSwitchRecord {
    pub fn inactive() -> Self {
        Self {
            state: KillSwitchState::Inactive,
            reason: None,
            message: String::new(),
            operator: None,
            activated_at: None,
            updated_at: Timestamp::now(),
        }
    }

    fn fail_closed(message: String) -> Self {
        let now = Timestamp::now();
        Self {
            state: KillSwitchState::Active,
            reason: Some(KillReason::SystemError),
            message,
            operator: None,
            activated_at: Some(now),
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == KillSwitchState::Active
    }

    // 9.1: key=value lines, one field each. newlines in text are flattened
    pub fn to_record_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("state={}\n", self.state.as_str()));
        out.push_str(&format!("reason={}\n", self.reason.map(|r| r.as_str()).unwrap_or("")));
        out.push_str(&format!("message={}\n", flatten(&self.message)));
        out.push_str(&format!("operator={}\n", self.operator.as_deref().map(flatten).unwrap_or_default()));
        out.push_str(&format!(
            "activated_at={}\n",
            self.activated_at.map(|t| t.to_rfc3339()).unwrap_or_default()
        ));
        out.push_str(&format!("updated_at={}\n", self.updated_at.to_rfc3339()));
        out
    }

    // 9.2: strict parse. anything off is corruption, which callers turn into ACTIVE
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut state = None;
        let mut reason = None;
        let mut message = String::new();
        let mut operator = None;
        let mut activated_at = None;
        let mut updated_at = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(format!("malformed line: {line}"));
            };
            let value = value.trim();
            match key.trim() {
                "state" => {
                    state = Some(
                        value
                            .parse::<KillSwitchState>()
                            .map_err(|_| format!("unknown state: {value}"))?,
                    )
                }
                "reason" if !value.is_empty() => {
                    reason = Some(
                        value
                            .parse::<KillReason>()
                            .map_err(|_| format!("unknown reason: {value}"))?,
                    )
                }
                "message" => message = value.to_string(),
                "operator" if !value.is_empty() => operator = Some(value.to_string()),
                "activated_at" if !value.is_empty() => activated_at = Some(parse_time(value)?),
                "updated_at" if !value.is_empty() => updated_at = Some(parse_time(value)?),
                _ => {}
            }
        }

        let state = state.ok_or_else(|| "record has no state".to_string())?;
        Ok(Self {
            state,
            reason,
            message,
            operator,
            activated_at,
            updated_at: updated_at.unwrap_or_else(Timestamp::now),
        })
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn parse_time(value: &str) -> Result<Timestamp, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| Timestamp::from_millis(dt.timestamp_millis()))
        .map_err(|e| format!("bad timestamp {value}: {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub reason: Option<KillReason>,
    pub message: String,
    pub operator: Option<String>,
    pub at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    #[error("deactivation requires an operator id")]
    MissingOperator,

    #[error("deactivation requires a justification")]
    MissingJustification,

    #[error("kill switch record could not be written: {0}")]
    Io(#[from] io::Error),
}

/// Handle to one kill switch record. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct KillSwitch {
    path: PathBuf,
    audit_path: PathBuf,
    // set when an activation could not be persisted; this process stays halted
    pinned: Mutex<Option<KillSwitchRecord>>,
    write_lock: Mutex<()>,
}

impl KillSwitch {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut audit = path.clone().into_os_string();
        audit.push(".audit.jsonl");
        Self {
            path,
            audit_path: PathBuf::from(audit),
            pinned: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_params(params: &KillSwitchParams) -> Self {
        Self::new(params.state_path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    // 9.3: current record, re-read from disk so other processes' writes are seen
    pub fn status(&self) -> KillSwitchRecord {
        if let Some(pinned) = self.pinned.lock().clone() {
            return pinned;
        }
        self.read_record()
    }

    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// `status` for async callers: the file read runs on the blocking pool.
    pub async fn load_status(self: &Arc<Self>) -> KillSwitchRecord {
        let switch = Arc::clone(self);
        match tokio::task::spawn_blocking(move || switch.status()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, "kill switch read task failed, failing closed");
                KillSwitchRecord::fail_closed(format!("kill switch read task failed: {e}"))
            }
        }
    }

    fn read_record(&self) -> KillSwitchRecord {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return KillSwitchRecord::inactive(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "kill switch unreadable, failing closed");
                return KillSwitchRecord::fail_closed(format!("kill switch record unreadable: {e}"));
            }
        };

        let Ok(content) = String::from_utf8(bytes) else {
            tracing::error!(path = %self.path.display(), "kill switch record is not utf-8, failing closed");
            return KillSwitchRecord::fail_closed("kill switch record is not valid utf-8".to_string());
        };
        if content.trim().is_empty() {
            return KillSwitchRecord::inactive();
        }

        match KillSwitchRecord::parse(&content) {
            Ok(record) => record,
            Err(reason) => {
                tracing::error!(path = %self.path.display(), %reason, "kill switch record corrupt, failing closed");
                KillSwitchRecord::fail_closed(format!("kill switch record corrupt: {reason}"))
            }
        }
    }

    // 9.4: always succeeds. a failed write pins ACTIVE in memory
    pub fn activate(&self, reason: KillReason, message: &str, operator: Option<&str>) -> KillSwitchRecord {
        let now = Timestamp::now();
        let record = KillSwitchRecord {
            state: KillSwitchState::Active,
            reason: Some(reason),
            message: message.to_string(),
            operator: operator.map(str::to_string).filter(|o| !o.trim().is_empty()),
            activated_at: Some(now),
            updated_at: now,
        };

        let _guard = self.write_lock.lock();
        match self.write_record(&record) {
            Ok(()) => *self.pinned.lock() = None,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "kill switch activation not persisted, holding ACTIVE in memory"
                );
                *self.pinned.lock() = Some(record.clone());
            }
        }
        self.append_audit(AuditEntry {
            action: AuditAction::Activate,
            reason: Some(reason),
            message: record.message.clone(),
            operator: record.operator.clone(),
            at: now,
        });

        tracing::warn!(reason = reason.as_str(), detail = message, "kill switch ACTIVATED");
        record
    }

    // 9.5: needs both an operator and a justification, otherwise nothing changes
    pub fn deactivate(&self, operator: &str, justification: &str) -> Result<KillSwitchRecord, KillSwitchError> {
        let operator = operator.trim();
        let justification = justification.trim();
        if operator.is_empty() {
            return Err(KillSwitchError::MissingOperator);
        }
        if justification.is_empty() {
            return Err(KillSwitchError::MissingJustification);
        }

        let now = Timestamp::now();
        let record = KillSwitchRecord {
            state: KillSwitchState::Inactive,
            reason: None,
            message: justification.to_string(),
            operator: Some(operator.to_string()),
            activated_at: None,
            updated_at: now,
        };

        let _guard = self.write_lock.lock();
        self.write_record(&record)?;
        *self.pinned.lock() = None;
        self.append_audit(AuditEntry {
            action: AuditAction::Deactivate,
            reason: None,
            message: justification.to_string(),
            operator: Some(operator.to_string()),
            at: now,
        });

        tracing::info!(operator, justification, "kill switch deactivated");
        Ok(record)
    }

    fn write_record(&self, record: &KillSwitchRecord) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(record.to_record_string().as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)
    }

    fn append_audit(&self, entry: AuditEntry) {
        let result = serde_json::to_string(&entry)
            .map_err(io::Error::other)
            .and_then(|line| {
                let mut file = OpenOptions::new().create(true).append(true).open(&self.audit_path)?;
                writeln!(file, "{line}")
            });
        if let Err(e) = result {
            tracing::error!(path = %self.audit_path.display(), error = %e, "kill switch audit append failed");
        }
    }

    /// Audit trail, oldest first. Lines that don't parse are skipped.
    pub fn audit_log(&self) -> Result<Vec<AuditEntry>, KillSwitchError> {
        let content = match fs::read_to_string(&self.audit_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
