//! Typed tables and enqueue-time payload validation.
//!
//! Payloads stay JSON objects on the wire, but the target table is a closed
//! enum and every payload is checked against the table's shape before it is
//! allowed into the queue. A malformed write is rejected while the user is
//! still looking at the form, not hours later during replay.

use crate::error::{SyncError, SyncResult};
use crate::operation::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Field name to value mapping sent to the remote store.
pub type Payload = Map<String, Value>;

/// A row as returned by the remote store after a write.
pub type Row = Map<String, Value>;

/// Remote tables that accept offline writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Clients,
    Cases,
    Invoices,
    Expenses,
    Appointments,
    TimeEntries,
    Documents,
    Tasks,
    Notifications,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Clients,
        Table::Cases,
        Table::Invoices,
        Table::Expenses,
        Table::Appointments,
        Table::TimeEntries,
        Table::Documents,
        Table::Tasks,
        Table::Notifications,
    ];

    /// Remote table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::Cases => "cases",
            Table::Invoices => "invoices",
            Table::Expenses => "expenses",
            Table::Appointments => "appointments",
            Table::TimeEntries => "time_entries",
            Table::Documents => "documents",
            Table::Tasks => "tasks",
            Table::Notifications => "notifications",
        }
    }

    /// Fields a `create` must carry for the remote insert to succeed.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Table::Clients => &["name"],
            Table::Cases => &["title", "client_id"],
            Table::Invoices => &["client_id", "amount"],
            Table::Expenses => &["description", "amount"],
            Table::Appointments => &["title", "start_time"],
            Table::TimeEntries => &["case_id", "hours"],
            Table::Documents => &["name", "case_id"],
            Table::Tasks => &["title"],
            Table::Notifications => &["user_id", "message"],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| SyncError::invalid_payload(s, "unknown table"))
    }
}

fn field_name_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(r"^[a-z][a-z0-9_]*$").expect("field name pattern is valid")
    })
}

/// Validate a write and turn its data into a [`Payload`].
///
/// `data` must be a JSON object; `null` is accepted for deletes and treated
/// as an empty payload.
pub fn validate(
    table: Table,
    kind: OperationKind,
    data: Value,
    record_id: Option<&str>,
) -> SyncResult<Payload> {
    let reject = |reason: String| SyncError::invalid_payload(table.as_str(), reason);

    let payload = match data {
        Value::Object(map) => map,
        Value::Null if kind == OperationKind::Delete => Payload::new(),
        other => {
            return Err(reject(format!(
                "data must be an object, got {}",
                json_type_name(&other)
            )))
        }
    };

    match (kind, record_id) {
        (OperationKind::Create, Some(_)) => {
            return Err(reject("create must not carry a record id".to_string()));
        }
        (OperationKind::Update | OperationKind::Delete, None) => {
            return Err(reject(format!("{kind} requires a record id")));
        }
        (OperationKind::Update | OperationKind::Delete, Some(id)) if id.trim().is_empty() => {
            return Err(reject(format!("{kind} requires a non-empty record id")));
        }
        _ => {}
    }

    if kind != OperationKind::Delete && payload.is_empty() {
        return Err(reject(format!("{kind} with empty data")));
    }

    for field in payload.keys() {
        if !field_name_pattern().is_match(field) {
            return Err(reject(format!("invalid field name `{field}`")));
        }
        if field == "id" && kind != OperationKind::Delete {
            return Err(reject(
                "`id` is assigned by the remote store and cannot be written".to_string(),
            ));
        }
    }

    if kind == OperationKind::Create {
        if let Some(missing) = table
            .required_fields()
            .iter()
            .find(|field| payload.get(**field).map_or(true, Value::is_null))
        {
            return Err(reject(format!("missing field `{missing}`")));
        }
    }

    Ok(payload)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
