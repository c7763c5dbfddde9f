#![no_main]
use hestia::modbus::register::{Encoding, bytes_to_registers, decode_string};
use libfuzzer_sys::fuzz_target;

const ENCODINGS: &[Encoding] = &[
    Encoding::Bool8,
    Encoding::Int16,
    Encoding::Int16Nan,
    Encoding::Uint16,
    Encoding::Uint16Nan,
    Encoding::Bool16(0x0101),
    Encoding::Int32,
    Encoding::Int32Nan,
    Encoding::Int32s,
    Encoding::Uint32,
    Encoding::Uint32s,
    Encoding::Uint32Nan,
    Encoding::Float32,
    Encoding::Float32s,
    Encoding::Uint64,
    Encoding::Uint64Nan,
    Encoding::Float64,
];

fuzz_target!(|data: &[u8]| {
    // Exercise the decoders under varying lengths
    for enc in ENCODINGS {
        if let Ok(v) = enc.decode(data) {
            assert!(v.is_finite());
        }
    }
    let _ = bytes_to_registers(data);
    let _ = decode_string(data);
});
