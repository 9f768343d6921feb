#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding must never panic, whatever the server sends.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(event) = bingo_round_sync::protocol::ServerEvent::decode(text) {
            // Anything that decodes must encode again.
            let _ = event.encode();
            let _ = event.round_number();
        }
    }

    // Also exercise serde's raw-byte path for the same type.
    let _ = serde_json::from_slice::<bingo_round_sync::protocol::ServerEvent>(data);
});
