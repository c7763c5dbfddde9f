#![no_main]
use hestia::snmp::Message;
use hestia::snmp::usm::{Keys, V3Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = Message::decode(data) {
        for (_, value) in &msg.pdu.varbinds {
            let _ = value.to_text();
        }
        let _ = msg.encode();
    }
    if let Ok(msg) = V3Message::decode(data) {
        let _ = msg.encode();
        let _ = Keys::default().open(data);
    }
});
