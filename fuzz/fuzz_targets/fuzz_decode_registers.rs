#![no_main]
use helios::config::RegistersConfig;
use helios::measurement::{BatteryReading, MeterReading};
use helios::registers::{self, RegisterResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First two bytes pick the base register, the rest is the framed response
    let Some((head, body)) = data.split_first_chunk::<2>() else {
        return;
    };
    let first = u16::from_be_bytes(*head);

    let _ = registers::decode_uint_be(body);
    let _ = registers::decode_int_be(body);
    let _ = registers::decode_bitfield(body);
    let _ = registers::decode_string(body);

    if let Ok(response) = RegisterResponse::from_bytes(first, body.to_vec()) {
        let map = RegistersConfig::default();
        let _ = MeterReading::decode(&map, &response);
        let _ = BatteryReading::decode(&map, &response);
        for width in 0..=9 {
            let _ = response.int(first.wrapping_add(width as u16), width);
        }
    }
});
