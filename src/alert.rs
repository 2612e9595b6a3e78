//! Alert delivery seam and template rendering.
//!
//! The recorder renders a subject/body pair from the configured templates
//! and hands it to an [`AlertSink`]. Delivery is fire-and-forget; sinks
//! swallow their own transport errors instead of throwing back into the
//! recorder.

use std::fmt;
use std::future::Future;

use crate::recorder::ExecutionEvent;

/// Deliver one rendered alert.
///
/// One trait, one operation — implement this to replace the delivery step in
/// tests, or to bridge to the SMTP/webhook transports of the outer layer.
pub trait AlertSink: Send + Sync + Clone + 'static {
    fn notify(&self, subject: String, body: String) -> impl Future<Output = ()> + Send;
}

/// Writes alerts to the log stream — the default sink when no transport is
/// wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    async fn notify(&self, subject: String, body: String) {
        tracing::warn!(%subject, %body, "alert raised");
    }
}

/// Fans one alert out to two sinks; nest pairs for longer chains. Static
/// composition — no runtime type dispatch.
#[derive(Debug, Clone)]
pub struct Fanout<A, B>(pub A, pub B);

impl<A: AlertSink, B: AlertSink> AlertSink for Fanout<A, B> {
    async fn notify(&self, subject: String, body: String) {
        self.0.notify(subject.clone(), body.clone()).await;
        self.1.notify(subject, body).await;
    }
}

/// Alert categories rendered into `${AlertType}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    Failure,
    ConsecutiveFailures(u32),
    SlowRun,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure => write!(f, "Failure"),
            Self::ConsecutiveFailures(n) => write!(f, "Consecutive failures ({n})"),
            Self::SlowRun => write!(f, "Slow run"),
        }
    }
}

/// Everything a template can refer to.
pub struct AlertContext<'a> {
    pub event: &'a ExecutionEvent,
    pub kind: AlertType,
    pub consecutive_failures: u32,
    pub custom_message: &'a str,
}

/// Token substitution over a template. Unrecognized text passes through
/// untouched.
pub fn render(template: &str, ctx: &AlertContext<'_>) -> String {
    let exit_code = ctx
        .event
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    let error = ctx.event.error.as_deref().unwrap_or("");

    template
        .replace("${AlertType}", &ctx.kind.to_string())
        .replace("${CommandId}", &ctx.event.command_id)
        .replace("${Command}", &ctx.event.command)
        .replace("${StartUtc}", &ctx.event.start_utc.to_rfc3339())
        .replace("${EndUtc}", &ctx.event.end_utc.to_rfc3339())
        .replace("${ExitCode}", &exit_code)
        .replace("${DurationMs}", &ctx.event.duration_ms.to_string())
        .replace("${Error}", error)
        .replace(
            "${ConsecutiveFailures}",
            &ctx.consecutive_failures.to_string(),
        )
        .replace("${CustomMessage}", ctx.custom_message)
}
