//! W3C Trace Context propagation for checkpoint fan-out.
//!
//! Every request a checkpoint coordinator sends to a partition carries a child
//! span of the coordinator's context. The child is remembered under the
//! request's cookie and joined back when the partition answers, so traces of
//! the whole fan-out hang off the caller's span. Format:
//! <https://www.w3.org/TR/trace-context/>
//!
//! ## Header Format
//!
//! `{version}-{trace_id}-{parent_id}-{trace_flags}`
//!
//! Example: `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`

use std::{collections::HashMap, fmt};

use snafu::{OptionExt, Snafu, ensure};
use uuid::Uuid;

/// Trace flags bit indicating the trace is sampled.
pub const TRACE_FLAG_SAMPLED: u8 = 0x01;

/// Trace context attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// W3C trace ID (32 hex chars, 16 bytes).
    pub trace_id: String,
    /// Span ID for this request (16 hex chars, 8 bytes).
    pub span_id: String,
    /// Parent span ID, if the context was derived from another.
    pub parent_span_id: Option<String>,
    /// W3C trace flags (bit 0 = sampled).
    pub trace_flags: u8,
}

impl TraceContext {
    /// Starts a new sampled trace.
    pub fn new() -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_span_id: None,
            trace_flags: TRACE_FLAG_SAMPLED,
        }
    }

    /// Creates a child span that keeps the trace ID and flags.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            trace_flags: self.trace_flags,
        }
    }

    /// Check if the sampled flag is set.
    pub fn is_sampled(&self) -> bool {
        self.trace_flags & TRACE_FLAG_SAMPLED != 0
    }

    /// Format as W3C traceparent header value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.trace_flags)
    }

    /// Continues a trace received from a caller.
    ///
    /// The returned context is a new span whose parent is the caller's span.
    /// Versions above `00` may carry extra trailing fields, which are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] naming the first field that is malformed.
    pub fn from_traceparent(traceparent: &str) -> Result<Self, ParseError> {
        let mut fields = traceparent.split('-');
        let version = hex_field(fields.next(), 2).context(InvalidFieldSnafu { field: "version" })?;
        ensure!(version != "ff", UnsupportedVersionSnafu);

        let trace_id = hex_field(fields.next(), 32).context(InvalidFieldSnafu { field: "trace_id" })?;
        ensure!(!is_zero(trace_id), ZeroIdSnafu { field: "trace_id" });
        let parent_id = hex_field(fields.next(), 16).context(InvalidFieldSnafu { field: "parent_id" })?;
        ensure!(!is_zero(parent_id), ZeroIdSnafu { field: "parent_id" });
        let flags = hex_field(fields.next(), 2).context(InvalidFieldSnafu { field: "trace_flags" })?;
        ensure!(version != "00" || fields.next().is_none(), TrailingFieldsSnafu);

        Ok(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: generate_span_id(),
            parent_span_id: Some(parent_id.to_ascii_lowercase()),
            trace_flags: u8::from_str_radix(flags, 16).map_err(|_| ParseError::InvalidField {
                field: "trace_flags",
            })?,
        })
    }

    /// Continues the caller's trace, or starts a new one if the header is
    /// absent or malformed.
    pub fn extract_or_generate(traceparent: Option<&str>) -> Self {
        let Some(header) = traceparent else { return Self::new() };
        Self::from_traceparent(header).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Ignoring malformed traceparent");
            Self::new()
        })
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_traceparent())
    }
}

/// Why a traceparent header was refused.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum ParseError {
    /// A field is missing, has the wrong length or is not hex.
    #[snafu(display("traceparent {field} is missing or malformed"))]
    InvalidField {
        /// Header field name.
        field: &'static str,
    },
    /// Version `ff` is reserved.
    #[snafu(display("traceparent version ff is not supported"))]
    UnsupportedVersion,
    /// An id is all zeroes.
    #[snafu(display("traceparent {field} is all zeroes"))]
    ZeroId {
        /// Header field name.
        field: &'static str,
    },
    /// Version `00` headers have exactly four fields.
    #[snafu(display("traceparent version 00 has trailing fields"))]
    TrailingFields,
}

/// Child spans of in-flight sub-requests, keyed by cookie.
#[derive(Debug, Default)]
pub struct ForkedTraces {
    children: HashMap<u64, TraceContext>,
}

impl ForkedTraces {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a child of `parent` for the sub-request `cookie` and remembers it.
    pub fn fork(&mut self, parent: &TraceContext, cookie: u64) -> TraceContext {
        let child = parent.child();
        self.children.insert(cookie, child.clone());
        child
    }

    /// Takes back the child span of `cookie`.
    ///
    /// Returns `None` if the cookie was never forked or was already joined.
    pub fn join(&mut self, cookie: u64) -> Option<TraceContext> {
        self.children.remove(&cookie)
    }

    /// Number of sub-requests still outstanding.
    pub fn outstanding(&self) -> usize {
        self.children.len()
    }
}

/// Generate a random 32-character hex trace ID (16 bytes).
fn generate_trace_id() -> String {
    hex_encode(Uuid::new_v4().as_bytes())
}

/// Generate a random 16-character hex span ID (8 bytes).
fn generate_span_id() -> String {
    let uuid = Uuid::new_v4();
    hex_encode(&uuid.as_bytes()[..8])
}

/// Returns `field` if it is exactly `len` hex digits.
fn hex_field(field: Option<&str>, len: usize) -> Option<&str> {
    field.filter(|f| f.len() == len && f.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn is_zero(id: &str) -> bool {
    id.bytes().all(|b| b == b'0')
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
