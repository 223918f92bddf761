use crate::crc::append_crc;
use crate::frame::{
    self, FrameError, ReadRequest, FUNC_READ_HOLDING, MIN_WRITE_FRAME_LEN,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Exception function code: 0x03 with the high bit set.
const FUNC_READ_EXCEPTION: u8 = FUNC_READ_HOLDING | 0x80;

/// Fixed byte-count field of an exception response.
const EXCEPTION_BYTE_COUNT: u8 = 0x02;

/// Built-in defaults for the first ten holding registers, keyed by
/// absolute address. Values mimic a typical single-phase inverter
/// (voltage, temperature, power, ...).
fn default_register(addr: u16) -> Option<u16> {
    let value = match addr {
        0 => 2300,
        1 => 25,
        2 => 5000,
        3 => 3200,
        4 => 3150,
        5 => 85,
        6 => 82,
        7 => 350,
        8 => 75,
        9 => 1850,
        _ => return None,
    };
    Some(value)
}

/// Simulated Modbus-speaking inverter.
///
/// The register map and exception set live for the process lifetime and
/// are mutated only through [`InverterSimulator::configure`]. A read that
/// races a configuration update observes either the old or the new state,
/// never a partially applied one: the exception set is replaced as a
/// whole field under the write lock.
pub struct InverterSimulator {
    registers: RwLock<HashMap<u16, u16>>,
    exceptions: RwLock<HashSet<u16>>,
}

impl InverterSimulator {
    pub fn new() -> Self {
        Self {
            registers: RwLock::new(HashMap::new()),
            exceptions: RwLock::new(HashSet::new()),
        }
    }

    /// Answer a read-holding-registers request frame.
    ///
    /// A start address in the exception set produces the fixed exception
    /// response `[slave, 0x83, 0x02, crc]`; it never repeats the request
    /// address or any register contents. Otherwise each requested address
    /// resolves through an ordered ladder: configured map, built-in
    /// default table, then `(offset_in_request + 1) * 10`.
    pub async fn read_frame(&self, data: &[u8]) -> Result<Vec<u8>, FrameError> {
        let req = ReadRequest::parse(data)?;

        if self.exceptions.read().await.contains(&req.start_addr) {
            let mut payload = vec![req.slave, FUNC_READ_EXCEPTION, EXCEPTION_BYTE_COUNT];
            append_crc(&mut payload);

            debug!(
                slave = %req.slave,
                start_addr = %req.start_addr,
                "Read hit exception address"
            );
            return Ok(payload);
        }

        let registers = self.registers.read().await;

        let byte_count = (req.quantity as usize) * 2;
        let mut payload = Vec::with_capacity(3 + byte_count + 2);
        payload.push(req.slave);
        payload.push(FUNC_READ_HOLDING);
        payload.push(byte_count as u8);

        for offset in 0..req.quantity {
            let addr = req.start_addr.wrapping_add(offset);
            let value = registers
                .get(&addr)
                .copied()
                .or_else(|| default_register(addr))
                .unwrap_or_else(|| ((offset as u32 + 1) * 10) as u16);
            payload.extend_from_slice(&value.to_be_bytes());
        }
        drop(registers);

        append_crc(&mut payload);

        debug!(
            slave = %req.slave,
            start_addr = %req.start_addr,
            quantity = %req.quantity,
            "Synthesized read response"
        );

        Ok(payload)
    }

    /// Echo a write frame back with a freshly computed CRC.
    ///
    /// The core (everything but the trailing 2 bytes) is taken as-is; no
    /// register is actually written. Models a write acknowledgment only.
    pub async fn write_echo(&self, data: &[u8]) -> Result<Vec<u8>, FrameError> {
        if data.len() < MIN_WRITE_FRAME_LEN {
            return Err(FrameError::TooShort);
        }

        let core = &data[..data.len() - 2];
        let mut resp = core.to_vec();
        append_crc(&mut resp);

        debug!(frame_len = data.len(), "Echoed write frame");
        Ok(resp)
    }

    /// Merge register updates and optionally replace the exception set.
    ///
    /// Register updates overwrite key-wise; an exception list, when
    /// present, replaces the previous set entirely. Returns sorted
    /// snapshots of the resulting state for confirmation.
    pub async fn configure(
        &self,
        updates: Vec<(u16, u16)>,
        exceptions: Option<Vec<u16>>,
    ) -> (BTreeMap<u16, u16>, Vec<u16>) {
        let update_count = updates.len();
        let mut registers = self.registers.write().await;
        for (addr, value) in updates {
            registers.insert(addr, value);
        }
        let register_snapshot: BTreeMap<u16, u16> =
            registers.iter().map(|(&a, &v)| (a, v)).collect();
        drop(registers);

        let mut exceptions_guard = self.exceptions.write().await;
        if let Some(list) = exceptions {
            *exceptions_guard = list.into_iter().collect();
        }
        let mut exception_snapshot: Vec<u16> = exceptions_guard.iter().copied().collect();
        exception_snapshot.sort_unstable();
        drop(exceptions_guard);

        info!(
            updated = update_count,
            exceptions = exception_snapshot.len(),
            "Simulator configuration applied"
        );

        (register_snapshot, exception_snapshot)
    }

    /// Hex-boundary wrapper around [`read_frame`](Self::read_frame).
    pub async fn read_frame_hex(&self, hex_frame: &str) -> Result<String, FrameError> {
        let data = frame::decode_hex_frame(hex_frame)?;
        let resp = self.read_frame(&data).await?;
        Ok(frame::encode_hex_frame(&resp))
    }

    /// Hex-boundary wrapper around [`write_echo`](Self::write_echo).
    pub async fn write_echo_hex(&self, hex_frame: &str) -> Result<String, FrameError> {
        let data = frame::decode_hex_frame(hex_frame)?;
        let resp = self.write_echo(&data).await?;
        Ok(frame::encode_hex_frame(&resp))
    }
}

impl Default for InverterSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;

    fn read_request(start_addr: u16, quantity: u16) -> Vec<u8> {
        let mut req = vec![0x03, 0x03];
        req.extend_from_slice(&start_addr.to_be_bytes());
        req.extend_from_slice(&quantity.to_be_bytes());
        append_crc(&mut req);
        req
    }

    fn register_at(resp: &[u8], i: usize) -> u16 {
        u16::from_be_bytes([resp[3 + 2 * i], resp[4 + 2 * i]])
    }

    #[tokio::test]
    async fn default_table_values() {
        let sim = InverterSimulator::new();

        let resp = sim.read_frame(&read_request(0, 10)).await.unwrap();
        assert_eq!(resp[0], 0x03);
        assert_eq!(resp[1], 0x03);
        assert_eq!(resp[2], 20);
        assert_eq!(register_at(&resp, 0), 2300);
        assert_eq!(register_at(&resp, 9), 1850);
        assert_eq!(crc16(&resp), 0);
    }

    #[tokio::test]
    async fn offset_fallback_for_unmapped_addresses() {
        let sim = InverterSimulator::new();

        // Address 15 at offset 0.
        let resp = sim.read_frame(&read_request(15, 1)).await.unwrap();
        assert_eq!(register_at(&resp, 0), 10);

        // Addresses 14..=16: all unmapped, value depends on the offset
        // within the request, not the absolute address.
        let resp = sim.read_frame(&read_request(14, 3)).await.unwrap();
        assert_eq!(register_at(&resp, 0), 10);
        assert_eq!(register_at(&resp, 1), 20);
        assert_eq!(register_at(&resp, 2), 30);

        // In a sweep starting at 0, address 15 sits at offset 15.
        let resp = sim.read_frame(&read_request(0, 16)).await.unwrap();
        assert_eq!(register_at(&resp, 10), 110);
        assert_eq!(register_at(&resp, 15), 160);
    }

    #[tokio::test]
    async fn oversized_read_is_rejected_not_truncated() {
        let sim = InverterSimulator::new();

        // 128 registers: the byte-count field would wrap to 0 while 256
        // data bytes follow. Must be a rejection, never a response.
        let result = sim.read_frame(&read_request(0, 128)).await;
        assert_eq!(result, Err(FrameError::InvalidQuantity(128)));

        // Largest legal read still answers consistently.
        let resp = sim.read_frame(&read_request(0, 125)).await.unwrap();
        assert_eq!(resp[2], 250);
        assert_eq!(resp.len(), 3 + 250 + 2);
        assert_eq!(crc16(&resp), 0);
    }

    #[tokio::test]
    async fn configured_register_wins_over_default() {
        let sim = InverterSimulator::new();
        sim.configure(vec![(0, 42)], None).await;

        let resp = sim.read_frame(&read_request(0, 1)).await.unwrap();
        assert_eq!(register_at(&resp, 0), 42);
    }

    #[tokio::test]
    async fn exception_precedence_over_register_map() {
        let sim = InverterSimulator::new();
        sim.configure(vec![(0, 42)], Some(vec![0])).await;

        let resp = sim.read_frame(&read_request(0, 2)).await.unwrap();
        assert_eq!(resp, {
            let mut expected = vec![0x03, 0x83, 0x02];
            append_crc(&mut expected);
            expected
        });
    }

    #[tokio::test]
    async fn exception_set_is_fully_replaced() {
        let sim = InverterSimulator::new();
        sim.configure(vec![], Some(vec![0, 1])).await;
        let (_, exceptions) = sim.configure(vec![], Some(vec![7])).await;
        assert_eq!(exceptions, vec![7]);

        // Address 0 no longer raises an exception.
        let resp = sim.read_frame(&read_request(0, 1)).await.unwrap();
        assert_eq!(resp[1], 0x03);
    }

    #[tokio::test]
    async fn configure_without_exceptions_keeps_old_set() {
        let sim = InverterSimulator::new();
        sim.configure(vec![], Some(vec![3])).await;
        let (_, exceptions) = sim.configure(vec![(1, 99)], None).await;
        assert_eq!(exceptions, vec![3]);
    }

    #[tokio::test]
    async fn write_echo_preserves_core() {
        let sim = InverterSimulator::new();
        let frame = vec![0x03, 0x06, 0x00, 0x01, 0x12, 0x34, 0xFF, 0xFF];

        let resp = sim.write_echo(&frame).await.unwrap();
        assert_eq!(&resp[..6], &frame[..6]);

        let crc = crc16(&frame[..6]);
        assert_eq!(resp[6], (crc & 0xFF) as u8);
        assert_eq!(resp[7], (crc >> 8) as u8);
    }

    #[tokio::test]
    async fn write_echo_rejects_short_frames() {
        let sim = InverterSimulator::new();
        let result = sim.write_echo(&[0x03, 0x06, 0x00, 0x01, 0xFF]).await;
        assert_eq!(result, Err(FrameError::TooShort));
    }

    #[tokio::test]
    async fn read_hex_boundary() {
        let sim = InverterSimulator::new();
        let mut req = vec![0x03, 0x03, 0x00, 0x00, 0x00, 0x01];
        append_crc(&mut req);

        let resp = sim.read_frame_hex(&hex::encode(&req)).await.unwrap();
        // 2300 = 0x08FC at offset 0.
        assert!(resp.starts_with("030302"));
        assert_eq!(resp, resp.to_uppercase());

        assert_eq!(
            sim.read_frame_hex("nothex").await,
            Err(FrameError::InvalidHex)
        );
    }
}
