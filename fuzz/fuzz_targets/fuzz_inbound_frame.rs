#![no_main]

use libfuzzer_sys::fuzz_target;
use matchday_sync::protocol::{InboundFrame, JsonObject};

fuzz_target!(|data: &[u8]| {
    // Text path, exactly as frames leave the transport.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(frame) = InboundFrame::decode(text) {
            let _ = frame.message.label();
        }
    }

    // Already-parsed objects reach the same decoder through `from_object`.
    if let Ok(object) = serde_json::from_slice::<JsonObject>(data) {
        let _ = InboundFrame::from_object(object);
    }
});
