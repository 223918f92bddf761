use thiserror::Error;

/// Function code for "read holding registers".
pub const FUNC_READ_HOLDING: u8 = 0x03;

/// Minimum length of a read request frame, trailing CRC included.
pub const MIN_READ_FRAME_LEN: usize = 8;

/// Minimum length of a write frame accepted by the echo path.
pub const MIN_WRITE_FRAME_LEN: usize = 6;

/// Largest register count a read request may ask for. The Modbus limit;
/// anything above 127 would also wrap the one-byte byte-count field of
/// the response.
pub const MAX_READ_QUANTITY: u16 = 125;

/// Boundary-level frame rejections. These map to client errors, never to
/// Modbus exception responses.
#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
    #[error("no frame provided")]
    MissingFrame,

    #[error("invalid hex")]
    InvalidHex,

    #[error("frame too short")]
    TooShort,

    #[error("unsupported function in sim")]
    UnsupportedFunction(u8),

    #[error("invalid register count")]
    InvalidQuantity(u16),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Decode a hex-encoded frame from the request boundary.
pub fn decode_hex_frame(hex_frame: &str) -> Result<Vec<u8>> {
    hex::decode(hex_frame.trim()).map_err(|_| FrameError::InvalidHex)
}

/// Encode a response frame for the boundary. Uppercase by convention.
pub fn encode_hex_frame(frame: &[u8]) -> String {
    hex::encode_upper(frame)
}

/// Parsed read-holding-registers request (function 0x03).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadRequest {
    pub slave: u8,
    pub start_addr: u16,
    pub quantity: u16,
}

impl ReadRequest {
    /// Parse a raw request frame.
    ///
    /// Layout: slave(1) func(1) start_addr(2 BE) quantity(2 BE) crc(2).
    /// The caller's trailing CRC is not re-verified.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_READ_FRAME_LEN {
            return Err(FrameError::TooShort);
        }

        let func = data[1];
        if func != FUNC_READ_HOLDING {
            return Err(FrameError::UnsupportedFunction(func));
        }

        let quantity = u16::from_be_bytes([data[4], data[5]]);
        if quantity > MAX_READ_QUANTITY {
            return Err(FrameError::InvalidQuantity(quantity));
        }

        Ok(Self {
            slave: data[0],
            start_addr: u16::from_be_bytes([data[2], data[3]]),
            quantity,
        })
    }
}
