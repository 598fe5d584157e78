// OpenIGTLink v1 wire codec
//
// Every message is a 58-byte big-endian header followed by `body_size` bytes:
//
//   u16 version | char[12] type | char[20] device | u64 timestamp | u64 body_size | u64 crc
//
// The CRC is CRC-64 ECMA-182 over the body. Only the message types the locator needs
// are decoded: TDATA (tracking data) plus the STT_/STP_TDATA control queries.

use crate::device::{ControlQuery, QueryKind};
use crate::error::{LocatorError, LocatorResult};
use crate::types::InstrumentType;
use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_64_ECMA_182};

pub const HEADER_SIZE: usize = 58;
pub const IGTL_VERSION: u16 = 1;

const TYPE_LEN: usize = 12;
const DEVICE_LEN: usize = 20;
const ELEMENT_NAME_LEN: usize = 20;
const ELEMENT_SIZE: usize = ELEMENT_NAME_LEN + 2 + 12 * 4;
const COORDINATE_NAME_LEN: usize = 32;

/// Upper bound on accepted bodies; larger sizes mean a corrupted stream
pub const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub fn crc64(body: &[u8]) -> u64 {
    CRC64.checksum(body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub type_name: String,
    pub device_name: String,
    pub timestamp: u64,
    pub body_size: u64,
    pub crc: u64,
}

impl Header {
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> LocatorResult<Self> {
        let header = Self {
            version: BigEndian::read_u16(&buf[0..2]),
            type_name: read_fixed_str(&buf[2..14]),
            device_name: read_fixed_str(&buf[14..34]),
            timestamp: BigEndian::read_u64(&buf[34..42]),
            body_size: BigEndian::read_u64(&buf[42..50]),
            crc: BigEndian::read_u64(&buf[50..58]),
        };

        if header.body_size > MAX_BODY_SIZE {
            return Err(LocatorError::Protocol(format!(
                "{} body of {} bytes exceeds limit",
                header.type_name, header.body_size
            )));
        }
        Ok(header)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.version);
        write_fixed_str(&mut buf[2..14], &self.type_name);
        write_fixed_str(&mut buf[14..34], &self.device_name);
        BigEndian::write_u64(&mut buf[34..42], self.timestamp);
        BigEndian::write_u64(&mut buf[42..50], self.body_size);
        BigEndian::write_u64(&mut buf[50..58], self.crc);
        buf
    }
}

/// One tool inside a TDATA message
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingElement {
    pub name: String,
    pub instrument: InstrumentType,
    /// `r11 r21 r31 r12 r22 r32 r13 r23 r33 tx ty tz`
    pub matrix: [f32; 12],
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    TrackingData(Vec<TrackingElement>),
    StartTracking { resolution_ms: u32, coordinate: String },
    StopTracking,
    /// A type the locator does not interpret
    Other(String),
}

/// Decode a message body, verifying its CRC against the header
pub fn decode_body(header: &Header, body: &[u8]) -> LocatorResult<Message> {
    if body.len() as u64 != header.body_size {
        return Err(LocatorError::Protocol(format!(
            "{} body is {} bytes, header says {}",
            header.type_name,
            body.len(),
            header.body_size
        )));
    }
    let crc = crc64(body);
    if crc != header.crc {
        return Err(LocatorError::Protocol(format!(
            "CRC mismatch on {} from {:?}",
            header.type_name, header.device_name
        )));
    }

    match header.type_name.as_str() {
        "TDATA" => decode_tracking_data(body).map(Message::TrackingData),
        "STT_TDATA" => {
            if body.len() < 4 {
                return Err(LocatorError::Protocol("STT_TDATA body too short".to_string()));
            }
            Ok(Message::StartTracking {
                resolution_ms: BigEndian::read_u32(&body[0..4]),
                coordinate: read_fixed_str(&body[4..body.len().min(4 + COORDINATE_NAME_LEN)]),
            })
        }
        "STP_TDATA" => Ok(Message::StopTracking),
        other => Ok(Message::Other(other.to_string())),
    }
}

fn decode_tracking_data(body: &[u8]) -> LocatorResult<Vec<TrackingElement>> {
    if body.len() % ELEMENT_SIZE != 0 {
        return Err(LocatorError::Protocol(format!(
            "TDATA body of {} bytes is not a multiple of {}",
            body.len(),
            ELEMENT_SIZE
        )));
    }

    Ok(body
        .chunks_exact(ELEMENT_SIZE)
        .map(|chunk| {
            let mut matrix = [0f32; 12];
            BigEndian::read_f32_into(&chunk[ELEMENT_NAME_LEN + 2..], &mut matrix);
            TrackingElement {
                name: read_fixed_str(&chunk[..ELEMENT_NAME_LEN]),
                instrument: InstrumentType::from(chunk[ELEMENT_NAME_LEN]),
                matrix,
            }
        })
        .collect())
}

/// Frame a body with a freshly computed header
pub fn encode_message(type_name: &str, device_name: &str, body: &[u8]) -> Vec<u8> {
    let header = Header {
        version: IGTL_VERSION,
        type_name: type_name.to_string(),
        device_name: device_name.to_string(),
        timestamp: igtl_timestamp_now(),
        body_size: body.len() as u64,
        crc: crc64(body),
    };
    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out
}

pub fn encode_tracking_data(device_name: &str, elements: &[TrackingElement]) -> Vec<u8> {
    let mut body = vec![0u8; elements.len() * ELEMENT_SIZE];
    for (element, chunk) in elements.iter().zip(body.chunks_exact_mut(ELEMENT_SIZE)) {
        write_fixed_str(&mut chunk[..ELEMENT_NAME_LEN], &element.name);
        chunk[ELEMENT_NAME_LEN] = element.instrument.into();
        BigEndian::write_f32_into(&element.matrix, &mut chunk[ELEMENT_NAME_LEN + 2..]);
    }
    encode_message("TDATA", device_name, &body)
}

/// `STT_<name>` / `STP_<name>` for a control query
pub fn encode_query(query: &ControlQuery) -> Vec<u8> {
    match query.kind {
        QueryKind::Start => {
            let mut body = [0u8; 4 + COORDINATE_NAME_LEN];
            BigEndian::write_u32(&mut body[0..4], query.resolution_ms);
            encode_message(&format!("STT_{}", query.name), &query.device_filter, &body)
        }
        QueryKind::Stop => encode_message(&format!("STP_{}", query.name), &query.device_filter, &[]),
    }
}

/// 32.32 fixed-point seconds since the Unix epoch
pub fn igtl_timestamp_now() -> u64 {
    let now = chrono::Utc::now();
    let seconds = now.timestamp().max(0) as u64;
    let fraction = ((now.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;
    (seconds << 32) | (fraction & 0xFFFF_FFFF)
}

fn read_fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn write_fixed_str(dst: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(dst.len());
    dst[..len].copy_from_slice(&bytes[..len]);
    dst[len..].fill(0);
}
