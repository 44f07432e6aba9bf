//! Bounded JSON rendering for the two HTTP documents.
//!
//! Both documents are diagnostic. Oversized inputs are truncated
//! deterministically rather than rejected, and rendering never fails.

use std::fmt::Write as _;

use dca_common::SERVICE_NAME;

use crate::http::ServerStatus;
use crate::telemetry::Telemetry;

/// Upper bound of the telemetry document, in bytes.
pub const STATE_JSON_MAX_BYTES: usize = 2047;

/// Upper bound of the server debug document, in bytes.
pub const DEBUG_JSON_MAX_BYTES: usize = 1023;

/// Upper bound of the escaped firmware string.
pub const ESCAPED_FIRMWARE_MAX_BYTES: usize = 63;

/// Upper bound of the escaped active game string.
pub const ESCAPED_GAME_MAX_BYTES: usize = 511;

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// character boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Append `input` to `out` as the inside of a JSON string literal.
///
/// `\` and `"` are backslash-escaped and control bytes become a space. At most
/// `bound` bytes are appended; the first character whose escaped form does not
/// fit ends the output.
pub fn escape_json_into(out: &mut String, input: &str, bound: usize) {
    let mut written = 0;
    for c in input.chars() {
        let width = match c {
            '\\' | '"' => 2,
            c if (c as u32) < 0x20 => 1,
            c => c.len_utf8(),
        };
        if written + width > bound {
            break;
        }
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => out.push(' '),
            c => out.push(c),
        }
        written += width;
    }
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn finish(mut doc: String, bound: usize) -> String {
    let len = truncate_utf8(&doc, bound).len();
    doc.truncate(len);
    doc
}

/// Render the telemetry document. The lock is held only to copy fields out.
pub fn build_state_json(telemetry: &Telemetry) -> String {
    let s = telemetry.snapshot();

    let mut firmware = String::with_capacity(ESCAPED_FIRMWARE_MAX_BYTES);
    escape_json_into(&mut firmware, &s.firmware, ESCAPED_FIRMWARE_MAX_BYTES);
    let mut game = String::with_capacity(64);
    escape_json_into(&mut game, &s.active_game, ESCAPED_GAME_MAX_BYTES);

    let mut doc = String::with_capacity(1024);
    // Writing into a String cannot fail.
    let _ = write!(
        doc,
        concat!(
            "{{",
            "\"service\":\"{}\",",
            "\"firmware\":\"{}\",",
            "\"active_program_id\":\"{}\",",
            "\"active_game\":\"{}\",",
            "\"started_sec\":{},",
            "\"last_update_sec\":{},",
            "\"sample_count\":{},",
            "\"last_pm_result\":\"{}\",",
            "\"last_pminfo_result\":\"{}\",",
            "\"last_ns_result\":\"{}\",",
            "\"last_svc_result\":\"{}\",",
            "\"last_process_id\":\"0x{:016X}\",",
            "\"detection_source\":{},",
            "\"detection_mode\":{},",
            "\"detection_attempt_count\":{},",
            "\"detection_success_count\":{},",
            "\"detection_fail_count\":{},",
            "\"detection_fail_streak\":{},",
            "\"detection_last_query_sec\":{},",
            "\"detection_last_success_sec\":{}",
            "}}"
        ),
        SERVICE_NAME,
        firmware,
        s.active_program_id,
        game,
        s.started_sec,
        s.last_update_sec,
        s.sample_count,
        s.last_pm_result,
        s.last_pminfo_result,
        s.last_ns_result,
        s.last_svc_result,
        s.last_process_id.0,
        s.detection_source.as_u8(),
        bool_str(s.detection_mode),
        s.detection_attempt_count,
        s.detection_success_count,
        s.detection_fail_count,
        s.detection_fail_streak,
        s.detection_last_query_sec,
        s.detection_last_success_sec,
    );
    finish(doc, STATE_JSON_MAX_BYTES)
}

/// Render the server debug document from its advisory counters.
pub fn build_debug_json(status: &ServerStatus) -> String {
    let d = status.snapshot();
    let mut doc = String::with_capacity(256);
    let _ = write!(
        doc,
        concat!(
            "{{",
            "\"running\":{},",
            "\"listening\":{},",
            "\"stage\":{},",
            "\"listen_fd\":{},",
            "\"port\":{},",
            "\"accepted_count\":{},",
            "\"request_count\":{},",
            "\"last_errno\":{}",
            "}}"
        ),
        bool_str(d.running),
        bool_str(d.listening),
        d.stage.code(),
        d.listen_fd,
        d.port,
        d.accepted_count,
        d.request_count,
        d.last_errno,
    );
    finish(doc, DEBUG_JSON_MAX_BYTES)
}
