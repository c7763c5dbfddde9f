#![no_main]
use hestia::sma::{Measurement, parse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(telegram) = parse(data) {
        let _ = telegram.value(Measurement::Power);
        let _ = telegram.value(Measurement::Current(1));
    }
});
