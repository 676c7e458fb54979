//! `tracing` layer that forwards events into a [`LogSink`].
//!
//! Event fields become the record context. Fields recorded on enclosing
//! spans are merged in first, so a `request_id` set on the capture span
//! shows up on every line emitted inside it.

use crate::entry::{LogEntry, LogLevel};
use crate::sink::LogSink;
use serde_json::{Map, Number, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Field that reroutes an info/debug event onto the queue channel.
pub const CHANNEL_FIELD: &str = "channel";

/// Fields recorded on a span, stored in its extensions.
struct SpanFields(Map<String, Value>);

/// Visitor that extracts fields from tracing events and spans.
struct FieldVisitor {
    fields: Map<String, Value>,
    message: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            fields: Map::new(),
            message: None,
        }
    }

    fn with_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            message: None,
        }
    }

    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.insert(field, Value::String(value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        match Number::from_f64(value) {
            Some(n) => self.insert(field, Value::Number(n)),
            None => self.insert(field, Value::String(value.to_string())),
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Layer writing every enabled event to the channel files of a [`LogSink`].
pub struct ChannelLayer {
    sink: LogSink,
}

impl ChannelLayer {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for ChannelLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let existing = extensions
            .remove::<SpanFields>()
            .map(|fields| fields.0)
            .unwrap_or_default();
        let mut visitor = FieldVisitor::with_fields(existing);
        values.record(&mut visitor);
        extensions.insert(SpanFields(visitor.fields));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut context = Map::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    for (key, value) in &fields.0 {
                        context.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let mut visitor = FieldVisitor::with_fields(context);
        event.record(&mut visitor);
        let mut context = visitor.fields;

        let metadata = event.metadata();
        let level = resolve_level(*metadata.level(), context.remove(CHANNEL_FIELD));
        context.insert(
            "target".to_string(),
            Value::String(metadata.target().to_string()),
        );

        let entry = LogEntry::new(
            level,
            visitor.message.unwrap_or_default(),
            context,
            self.sink.hostname(),
        );
        self.sink.record(entry);
    }
}

/// Warnings and errors always go to the error channel, even when tagged.
fn resolve_level(level: Level, channel: Option<Value>) -> LogLevel {
    let tagged_queue = matches!(channel, Some(Value::String(ref name)) if name == "queue");
    match level {
        Level::TRACE | Level::DEBUG | Level::INFO if tagged_queue => LogLevel::Queue,
        other => LogLevel::from(other),
    }
}
