//! Packet event record codec.
//!
//! The capture program submits `struct packet_info` verbatim through a perf
//! buffer. The layout below is the C struct with natural alignment:
//!
//! | offset | size | field           | byte order |
//! |--------|------|-----------------|------------|
//! | 0      | 4    | src_ip          | network    |
//! | 4      | 4    | dst_ip          | network    |
//! | 8      | 2    | src_port        | network    |
//! | 10     | 2    | dst_port        | network    |
//! | 12     | 1    | protocol        | -          |
//! | 13     | 1    | packet_type     | -          |
//! | 14     | 2    | (padding)       |            |
//! | 16     | 4    | packet_len      | host       |
//! | 20     | 4    | seq_num         | host       |
//! | 24     | 4    | ack_num         | host       |
//! | 28     | 1    | tcp_flags       | -          |
//! | 29     | 256  | http_data       | -          |
//! | 285    | 3    | (padding)       |            |
//! | 288    | 4    | http_data_len   | host       |
//!
//! Ports are read as network order. The stock `http_filter` producer
//! converts them with `bpf_ntohs` before storing, so on little-endian hosts
//! its ports arrive byte-swapped; producers must store them unconverted.

use std::net::Ipv4Addr;

use flowtap_schema::{PacketEvent, Protocol, MAX_PAYLOAD_SAMPLE};
use thiserror::Error;

/// Size of one record including structure padding.
pub const RECORD_SIZE: usize = 292;

mod offset {
    pub const SRC_IP: usize = 0;
    pub const DST_IP: usize = 4;
    pub const SRC_PORT: usize = 8;
    pub const DST_PORT: usize = 10;
    pub const PROTOCOL: usize = 12;
    pub const PACKET_TYPE: usize = 13;
    pub const PACKET_LEN: usize = 16;
    pub const SEQ_NUM: usize = 20;
    pub const ACK_NUM: usize = 24;
    pub const TCP_FLAGS: usize = 28;
    pub const HTTP_DATA: usize = 29;
    pub const HTTP_DATA_LEN: usize = 288;
}

/// Errors from decoding a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("record truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("payload sample length {len} exceeds capacity {capacity}", capacity = MAX_PAYLOAD_SAMPLE)]
    MalformedLength { len: u32 },
}

/// Decode one raw record.
///
/// Buffers longer than `RECORD_SIZE` are accepted (perf buffers may pad the
/// sample); the extra bytes are ignored.
pub fn decode(raw: &[u8]) -> Result<PacketEvent, DecodeError> {
    if raw.len() < RECORD_SIZE {
        return Err(DecodeError::Truncated {
            expected: RECORD_SIZE,
            actual: raw.len(),
        });
    }

    let payload_len = read_u32_ne(raw, offset::HTTP_DATA_LEN);
    if payload_len as usize > MAX_PAYLOAD_SAMPLE {
        return Err(DecodeError::MalformedLength { len: payload_len });
    }

    let payload_start = offset::HTTP_DATA;
    let payload_end = payload_start + payload_len as usize;
    let packet_type = raw[offset::PACKET_TYPE];

    Ok(PacketEvent {
        protocol: Protocol::from_code(packet_type),
        packet_type,
        ip_protocol: raw[offset::PROTOCOL],
        src_addr: read_addr(raw, offset::SRC_IP),
        dst_addr: read_addr(raw, offset::DST_IP),
        src_port: read_u16_be(raw, offset::SRC_PORT),
        dst_port: read_u16_be(raw, offset::DST_PORT),
        packet_len: read_u32_ne(raw, offset::PACKET_LEN),
        seq_num: read_u32_ne(raw, offset::SEQ_NUM),
        ack_num: read_u32_ne(raw, offset::ACK_NUM),
        tcp_flags: raw[offset::TCP_FLAGS],
        payload: raw[payload_start..payload_end].to_vec(),
    })
}

/// Encode an event into the record layout.
///
/// Padding and sample bytes past the payload length are zero. Payloads longer
/// than the sample capacity are truncated to it.
pub fn encode(event: &PacketEvent) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];

    buf[offset::SRC_IP..offset::SRC_IP + 4].copy_from_slice(&event.src_addr.octets());
    buf[offset::DST_IP..offset::DST_IP + 4].copy_from_slice(&event.dst_addr.octets());
    buf[offset::SRC_PORT..offset::SRC_PORT + 2].copy_from_slice(&event.src_port.to_be_bytes());
    buf[offset::DST_PORT..offset::DST_PORT + 2].copy_from_slice(&event.dst_port.to_be_bytes());
    buf[offset::PROTOCOL] = event.ip_protocol;
    buf[offset::PACKET_TYPE] = event.packet_type;
    buf[offset::PACKET_LEN..offset::PACKET_LEN + 4].copy_from_slice(&event.packet_len.to_ne_bytes());
    buf[offset::SEQ_NUM..offset::SEQ_NUM + 4].copy_from_slice(&event.seq_num.to_ne_bytes());
    buf[offset::ACK_NUM..offset::ACK_NUM + 4].copy_from_slice(&event.ack_num.to_ne_bytes());
    buf[offset::TCP_FLAGS] = event.tcp_flags;

    let sample = &event.payload[..event.payload.len().min(MAX_PAYLOAD_SAMPLE)];
    buf[offset::HTTP_DATA..offset::HTTP_DATA + sample.len()].copy_from_slice(sample);
    buf[offset::HTTP_DATA_LEN..offset::HTTP_DATA_LEN + 4]
        .copy_from_slice(&(sample.len() as u32).to_ne_bytes());

    buf
}

// Callers have already checked `raw.len() >= RECORD_SIZE`, so every fixed
// offset below is in bounds.

fn read_addr(raw: &[u8], at: usize) -> Ipv4Addr {
    Ipv4Addr::new(raw[at], raw[at + 1], raw[at + 2], raw[at + 3])
}

fn read_u16_be(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn read_u32_ne(raw: &[u8], at: usize) -> u32 {
    u32::from_ne_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> PacketEvent {
        PacketEvent {
            protocol: Protocol::Tcp,
            packet_type: 0,
            ip_protocol: 6,
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(172, 16, 5, 9),
            src_port: 51234,
            dst_port: 80,
            packet_len: 1500,
            seq_num: 0xDEADBEEF,
            ack_num: 0x01020304,
            tcp_flags: 0x18,
            payload: b"GET /index.html HTTP/1.1\r\nHost: example\r\n".to_vec(),
        }
    }

    // ===========================================
    // Layout
    // ===========================================

    #[test]
    fn test_record_size_matches_c_layout() {
        // 29 bytes of header fields, 256 sample bytes, 3 padding, 4 length.
        assert_eq!(RECORD_SIZE, offset::HTTP_DATA_LEN + 4);
        assert_eq!(offset::HTTP_DATA + MAX_PAYLOAD_SAMPLE + 3, offset::HTTP_DATA_LEN);
    }

    #[test]
    fn test_addresses_are_network_order() {
        let buf = encode(&sample_event());
        assert_eq!(&buf[0..4], &[10, 0, 0, 1]);
        assert_eq!(&buf[4..8], &[172, 16, 5, 9]);
    }

    #[test]
    fn test_ports_are_network_order() {
        let buf = encode(&sample_event());
        assert_eq!(&buf[8..10], &51234u16.to_be_bytes());
        assert_eq!(&buf[10..12], &[0, 80]);
    }

    // ===========================================
    // Decode
    // ===========================================

    #[test]
    fn test_decode_fields() {
        let event = decode(&encode(&sample_event())).expect("decode");

        assert_eq!(event.protocol, Protocol::Tcp);
        assert_eq!(event.src_addr.to_string(), "10.0.0.1");
        assert_eq!(event.dst_addr.to_string(), "172.16.5.9");
        assert_eq!(event.src_port, 51234);
        assert_eq!(event.dst_port, 80);
        assert_eq!(event.packet_len, 1500);
        assert_eq!(event.seq_num, 0xDEADBEEF);
        assert_eq!(event.ack_num, 0x01020304);
        assert_eq!(event.tcp_flags, 0x18);
        assert_eq!(event.ip_protocol, 6);
    }

    #[test]
    fn test_decode_reads_only_declared_payload() {
        let mut buf = encode(&sample_event());
        // Garbage past the declared length must not leak into the event.
        let declared = sample_event().payload.len();
        for b in &mut buf[offset::HTTP_DATA + declared..offset::HTTP_DATA + MAX_PAYLOAD_SAMPLE] {
            *b = 0xAA;
        }

        let event = decode(&buf).expect("decode");
        assert_eq!(event.payload, sample_event().payload);
    }

    #[test]
    fn test_decode_full_payload_capacity() {
        let mut event = sample_event();
        event.payload = vec![b'x'; MAX_PAYLOAD_SAMPLE];

        let decoded = decode(&encode(&event)).expect("decode");
        assert_eq!(decoded.payload.len(), MAX_PAYLOAD_SAMPLE);
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut event = sample_event();
        event.payload.clear();

        let decoded = decode(&encode(&event)).expect("decode");
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_decode_unknown_packet_type_is_lenient() {
        let mut event = sample_event();
        event.packet_type = 9;

        let decoded = decode(&encode(&event)).expect("decode");
        assert_eq!(decoded.protocol, Protocol::Unknown);
        assert_eq!(decoded.packet_type, 9);
    }

    #[test]
    fn test_decode_udp_and_icmp_codes() {
        for (code, expected) in [(1u8, Protocol::Udp), (2u8, Protocol::Icmp)] {
            let mut event = sample_event();
            event.packet_type = code;
            assert_eq!(decode(&encode(&event)).unwrap().protocol, expected);
        }
    }

    #[test]
    fn test_decode_accepts_trailing_bytes() {
        let mut buf = encode(&sample_event()).to_vec();
        buf.extend_from_slice(&[0u8; 4]);

        let event = decode(&buf).expect("decode");
        assert_eq!(event, sample_event());
    }

    // --- Truncated ---

    #[test]
    fn test_decode_empty_buffer_is_truncated() {
        assert_eq!(
            decode(&[]),
            Err(DecodeError::Truncated {
                expected: RECORD_SIZE,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_every_short_length_is_truncated() {
        let buf = encode(&sample_event());
        for len in 0..RECORD_SIZE {
            match decode(&buf[..len]) {
                Err(DecodeError::Truncated { expected, actual }) => {
                    assert_eq!(expected, RECORD_SIZE);
                    assert_eq!(actual, len);
                }
                other => panic!("length {len}: expected Truncated, got {other:?}"),
            }
        }
    }

    // --- MalformedLength ---

    #[test]
    fn test_decode_oversized_payload_length() {
        let mut buf = encode(&sample_event());
        buf[offset::HTTP_DATA_LEN..].copy_from_slice(&257u32.to_ne_bytes());

        assert_eq!(decode(&buf), Err(DecodeError::MalformedLength { len: 257 }));
    }

    #[test]
    fn test_decode_max_u32_payload_length() {
        let mut buf = encode(&sample_event());
        buf[offset::HTTP_DATA_LEN..].copy_from_slice(&u32::MAX.to_ne_bytes());

        assert_eq!(
            decode(&buf),
            Err(DecodeError::MalformedLength { len: u32::MAX })
        );
    }

    #[test]
    fn test_truncation_checked_before_length() {
        // A short buffer is Truncated even if whatever it holds looks malformed.
        let buf = [0xFFu8; RECORD_SIZE - 1];
        assert!(matches!(decode(&buf), Err(DecodeError::Truncated { .. })));
    }

    // ===========================================
    // Re-encode
    // ===========================================

    #[test]
    fn test_reencode_reproduces_producer_bytes() {
        // Build the record the way the producer would: zeroed struct, fields
        // written in place.
        let mut raw = [0u8; RECORD_SIZE];
        raw[0..4].copy_from_slice(&[192, 168, 0, 7]);
        raw[4..8].copy_from_slice(&[8, 8, 4, 4]);
        raw[8..10].copy_from_slice(&443u16.to_be_bytes());
        raw[10..12].copy_from_slice(&60000u16.to_be_bytes());
        raw[12] = 6;
        raw[13] = 0;
        raw[16..20].copy_from_slice(&74u32.to_ne_bytes());
        raw[20..24].copy_from_slice(&123456u32.to_ne_bytes());
        raw[24..28].copy_from_slice(&654321u32.to_ne_bytes());
        raw[28] = 0x12;
        raw[29..33].copy_from_slice(b"POST");
        raw[288..292].copy_from_slice(&4u32.to_ne_bytes());

        let event = decode(&raw).expect("decode");
        assert_eq!(encode(&event), raw);
    }

    #[test]
    fn test_encode_truncates_oversized_payload() {
        let mut event = sample_event();
        event.payload = vec![b'z'; MAX_PAYLOAD_SAMPLE + 10];

        let buf = encode(&event);
        let len = u32::from_ne_bytes(buf[288..292].try_into().unwrap());
        assert_eq!(len as usize, MAX_PAYLOAD_SAMPLE);
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Truncated {
            expected: 292,
            actual: 10,
        };
        assert_eq!(err.to_string(), "record truncated: expected 292 bytes, got 10");

        let err = DecodeError::MalformedLength { len: 300 };
        assert_eq!(
            err.to_string(),
            "payload sample length 300 exceeds capacity 256"
        );
    }
}
