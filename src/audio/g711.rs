//! G.711 µ-law / A-law expansion (ITU-T G.711), 8 kHz mono.

const MULAW_BIAS: i16 = 0x84;

pub fn mulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i16;
    let magnitude = ((mantissa << 3) + MULAW_BIAS) << exponent;
    if u & 0x80 != 0 {
        MULAW_BIAS - magnitude
    } else {
        magnitude - MULAW_BIAS
    }
}

pub fn alaw_to_linear(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let exponent = (a >> 4) & 0x07;
    let mantissa = (a & 0x0F) as i16;
    let magnitude = match exponent {
        0 => (mantissa << 4) + 8,
        _ => ((mantissa << 4) + 0x108) << (exponent - 1),
    };
    if a & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

pub fn decode_mulaw(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| mulaw_to_linear(b)).collect()
}

pub fn decode_alaw(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| alaw_to_linear(b)).collect()
}
