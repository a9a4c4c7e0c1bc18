//! Property-based tests for the log stream marker grammar and frame decoding.
//!
//! Uses proptest to verify:
//! 1. Arbitrary input never panics `parse_line` or `decode_frame`.
//! 2. Every known marker line parses to a control event, never a log line.
//! 3. Lines that do not start with `_` always stay ordinary output.
//! 4. Decoded frames never yield empty lines or lines containing `\n`.
//!
//! Verification command: `cargo test --test markers`

use fixwatch_proto::stream::{
    ERROR, FIX_EXHAUSTED, FIX_FAILED, FIX_STARTING, FIX_SUCCESS, HEALTH_CHECK_FAILED, LogFrame,
    PREVIEW_READY, PREVIEW_URL, SERVER_STARTED, StreamLine, VALIDATION_FAILED, decode_frame,
    parse_line,
};
use proptest::prelude::*;

const MARKERS: &[&str] = &[
    PREVIEW_READY,
    SERVER_STARTED,
    PREVIEW_URL,
    FIX_STARTING,
    FIX_SUCCESS,
    FIX_FAILED,
    FIX_EXHAUSTED,
    VALIDATION_FAILED,
    HEALTH_CHECK_FAILED,
    ERROR,
];

fn arb_marker() -> impl Strategy<Value = &'static str> {
    prop::sample::select(MARKERS)
}

proptest! {
    #[test]
    fn parse_line_never_panics(line in "\\PC*") {
        let _ = parse_line(&line);
    }

    #[test]
    fn marker_lines_are_control_events(
        marker in arb_marker(),
        payload in "[^\n]{0,80}",
        indent in " {0,4}",
    ) {
        let line = format!("{indent}{marker}:{payload}");
        prop_assert!(matches!(parse_line(&line), StreamLine::Control(_)));
        prop_assert!(matches!(parse_line(marker), StreamLine::Control(_)));
    }

    #[test]
    fn plain_output_stays_log(line in "[a-zA-Z0-9][^\n]{0,120}") {
        prop_assert_eq!(parse_line(&line), StreamLine::Log(line.clone()));
    }

    #[test]
    fn raw_frames_split_into_clean_lines(frame in "[a-z _\r\n]{0,200}") {
        for line in decode_frame(&frame) {
            prop_assert!(!line.contains('\n'));
            prop_assert!(!line.ends_with('\r'));
            prop_assert!(!line.trim().is_empty());
        }
    }

    #[test]
    fn json_frames_decode_like_raw_content(content in "[a-z0-9 \n]{0,200}") {
        let json = LogFrame::log(content.clone()).to_json();
        prop_assert_eq!(decode_frame(&json), decode_frame(&content));
    }

    #[test]
    fn decode_frame_never_panics(frame in "\\PC*") {
        let _ = decode_frame(&frame);
    }
}
