//! Fuzz target for traceparent parsing.
//!
//! Untrusted header values must never panic the parser, and a parsed context
//! must render a traceparent that parses again into the same trace.

#![no_main]

use libfuzzer_sys::fuzz_target;

use blockvol_volume::TraceContext;

fuzz_target!(|data: &[u8]| {
    let Ok(header) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(context) = TraceContext::from_traceparent(header) else {
        return;
    };
    let rendered = context.to_traceparent();
    let again = TraceContext::from_traceparent(&rendered).expect("rendered traceparent parses");
    assert_eq!(again.trace_id, context.trace_id);
    assert_eq!(again.trace_flags, context.trace_flags);
    assert_eq!(again.parent_span_id.as_deref(), Some(context.span_id.as_str()));
});
