//! Human readable rendering of request outcomes for the shell.

use coap_lite::{ContentFormat, Packet};

use crate::client::RequestOutcome;
use crate::format::hex_dump;

const CLASS_SUCCESS: u8 = 2;
const CLASS_CLIENT_FAILURE: u8 = 4;
const CLASS_SERVER_FAILURE: u8 = 5;

/// Describes how a request ended, one or more lines without a trailing
/// newline.
pub fn describe(outcome: &RequestOutcome) -> String {
    match outcome {
        RequestOutcome::Timeout { message_id } => {
            format!("coap: timeout for msg ID {:02}", message_id)
        }
        RequestOutcome::Error => "coap: error in response".to_string(),
        RequestOutcome::Response(packet) => describe_response(packet),
    }
}

fn describe_response(packet: &Packet) -> String {
    let code = u8::from(packet.header.code);
    let class = code >> 5;
    let detail = code & 0x1f;
    let class_str = if class == CLASS_SUCCESS {
        "Success"
    } else {
        "Error"
    };

    let mut out = format!("coap: response {}, code {}.{:02}", class_str, class, detail);
    if packet.payload.is_empty() {
        out.push_str(", empty payload");
        return out;
    }

    out.push_str(&format!(", {} bytes\n", packet.payload.len()));

    // failures carry a diagnostic payload
    let printable = matches!(
        packet.get_content_format(),
        Some(ContentFormat::TextPlain) | Some(ContentFormat::ApplicationLinkFormat)
    ) || class == CLASS_CLIENT_FAILURE
        || class == CLASS_SERVER_FAILURE;

    if printable {
        out.push_str(&String::from_utf8_lossy(&packet.payload));
    } else {
        out.push_str(hex_dump(&packet.payload).trim_end());
    }
    out
}
