use ecowatt_types::Sample;

/// Wire size of one sample record: u32 timestamp + u8 register + f32 value.
pub const SAMPLE_WIDTH: usize = 9;

/// Round to 3 decimal digits; the precision carried end to end.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Decode a raw upload payload into samples.
///
/// The buffer is consumed in strict 9-byte strides from offset 0:
/// timestamp (u32 LE), register address (u8), value (f32 LE). Trailing
/// bytes that do not complete a record are silently discarded; a payload
/// shorter than one record decodes to nothing. Pure function.
pub fn decode_samples(data: &[u8]) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(data.len() / SAMPLE_WIDTH);

    for chunk in data.chunks_exact(SAMPLE_WIDTH) {
        let timestamp = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let reg_addr = chunk[4];
        let value = f32::from_le_bytes([chunk[5], chunk[6], chunk[7], chunk[8]]);

        samples.push(Sample {
            timestamp,
            reg_addr,
            value: round3(value as f64),
        });
    }

    samples
}
