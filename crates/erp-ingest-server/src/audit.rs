// crates/erp-ingest-server/src/audit.rs
// ============================================================================
// Module: Auth Audit Sinks
// Description: Tracing and JSON-lines sinks for authentication decisions.
// Purpose: Route allow/deny events to operational logs or an audit file.
// Dependencies: erp-ingest-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! Both sinks serialize [`AuthAuditEvent`] as JSON. Events never carry
//! secrets or signatures. Write failures are dropped so auditing cannot fail
//! a request.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use erp_ingest_core::AuthAuditEvent;
use erp_ingest_core::AuthAuditSink;

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that emits events through `tracing`.
pub struct TracingAuditSink;

impl AuthAuditSink for TracingAuditSink {
    fn record(&self, event: &AuthAuditEvent) {
        let Ok(payload) = serde_json::to_string(event) else {
            return;
        };
        if event.decision == "allow" {
            tracing::info!(target: "erp_ingest::audit", audit = %payload, "auth decision");
        } else {
            tracing::warn!(target: "erp_ingest::audit", audit = %payload, "auth decision");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuthAuditSink for FileAuditSink {
    fn record(&self, event: &AuthAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
