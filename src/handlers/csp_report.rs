//! `POST /api/security/csp-report`
//!
//! Browsers post violation reports as `application/csp-report`, which the
//! `Json` extractor refuses, so the body is parsed by hand.

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::StatusCode;
use tracing::instrument;

use crate::error::AppResult;
use crate::middleware::events::{RequestContext, SecurityEventKind};
use crate::models::CspReportEnvelope;

/// Largest report body accepted.
pub const MAX_REPORT_BYTES: usize = 16 * 1024;

#[instrument(skip_all)]
pub async fn csp_report(
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> AppResult<StatusCode> {
    if body.len() > MAX_REPORT_BYTES {
        return Ok(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let envelope: CspReportEnvelope = serde_json::from_slice(&body)?;
    let report = envelope.report;
    let detail = format!(
        "directive={} blocked={} document={}",
        report
            .effective_directive
            .or(report.violated_directive)
            .as_deref()
            .unwrap_or("?"),
        report.blocked_uri.as_deref().unwrap_or("?"),
        report.document_uri.as_deref().unwrap_or("?"),
    );
    ctx.emit_with_detail(SecurityEventKind::CspViolation, &detail);

    Ok(StatusCode::NO_CONTENT)
}
