//! Span tracing.
//!
//! Off unless `--trace` or `HK_TRACE` asks for it. Text mode prints span
//! open/close lines to stderr through `tracing-subscriber`'s fmt layer; JSON
//! mode writes one record per line: a leading `meta` record followed by
//! `span_start`, `span_end` and `instant` records.

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{Event, Id, Subscriber};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, fmt};

use crate::Result;

pub const SPAN_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum TraceMode {
    #[default]
    Off,
    Text,
    Json,
}

/// Installs the global subscriber for `mode`. A no-op for [`TraceMode::Off`].
pub fn init_tracing(mode: TraceMode) -> Result<()> {
    use tracing_subscriber::prelude::*;

    if mode == TraceMode::Off {
        return Ok(());
    }

    // log records become trace events; fails harmlessly if a logger exists
    let _ = tracing_log::LogTracer::init();

    let result = match mode {
        TraceMode::Json => tracing_subscriber::registry()
            .with(JsonLayer::new(Box::new(std::io::stdout())))
            .try_init(),
        _ => {
            let fmt_layer = fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_timer(fmt::time::uptime())
                .with_ansi(console::Term::stderr().features().colors_supported())
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .compact();
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };
    result.map_err(|e| eyre::eyre!("failed to initialize tracing subscriber: {e}"))
}

/// JSON Lines layer.
pub struct JsonLayer {
    writer: Mutex<Box<dyn Write + Send>>,
    start: Instant,
    next_id: AtomicU64,
}

impl JsonLayer {
    /// Creates the layer and immediately writes the `meta` record.
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        let layer = Self {
            writer: Mutex::new(writer),
            start: Instant::now(),
            next_id: AtomicU64::new(0),
        };
        layer.write_json(&JsonMeta {
            r#type: "meta",
            span_schema_version: SPAN_SCHEMA_VERSION,
            tool: env!("CARGO_PKG_NAME"),
            tool_version: env!("CARGO_PKG_VERSION"),
            pid: std::process::id(),
        });
        layer
    }

    fn timestamp_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn next_span_id(&self) -> String {
        format!("span_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn write_json<T: Serialize>(&self, value: &T) {
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{json}");
            let _ = writer.flush();
        }
    }
}

impl<S> Layer<S> for JsonLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let span_id = self.next_span_id();
        let parent_id = span
            .parent()
            .and_then(|parent| parent.extensions().get::<SpanData>().map(|d| d.id.clone()));
        let start_ns = self.timestamp_ns();
        span.extensions_mut().insert(SpanData {
            id: span_id.clone(),
            start_ns,
        });

        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        self.write_json(&JsonSpanStart {
            r#type: "span_start",
            ts_ns: start_ns,
            id: span_id,
            name: attrs.metadata().name(),
            attrs: visitor.fields,
            parent_id,
        });
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let ext = span.extensions();
        if let Some(data) = ext.get::<SpanData>() {
            let ts_ns = self.timestamp_ns();
            self.write_json(&JsonSpanEnd {
                r#type: "span_end",
                ts_ns,
                id: data.id.clone(),
                name: span.name(),
                duration_ns: ts_ns.saturating_sub(data.start_ns),
            });
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        let parent_id = ctx
            .event_span(event)
            .and_then(|s| s.extensions().get::<SpanData>().map(|d| d.id.clone()));
        self.write_json(&JsonInstant {
            r#type: "instant",
            ts_ns: self.timestamp_ns(),
            name: event.metadata().name(),
            level: event.metadata().level().as_str(),
            attrs: visitor.fields,
            parent_id,
        });
    }
}

#[derive(Serialize)]
struct JsonMeta {
    r#type: &'static str,
    span_schema_version: u32,
    tool: &'static str,
    tool_version: &'static str,
    pid: u32,
}

#[derive(Serialize)]
struct JsonSpanStart {
    r#type: &'static str,
    ts_ns: u64,
    id: String,
    name: &'static str,
    attrs: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

#[derive(Serialize)]
struct JsonSpanEnd {
    r#type: &'static str,
    ts_ns: u64,
    id: String,
    name: &'static str,
    duration_ns: u64,
}

#[derive(Serialize)]
struct JsonInstant {
    r#type: &'static str,
    ts_ns: u64,
    name: &'static str,
    level: &'static str,
    attrs: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
}

struct SpanData {
    id: String,
    start_ns: u64,
}

#[derive(Default)]
struct JsonVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(format!("{value:?}")),
        );
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(
            field.name().to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::from(value));
    }
}
