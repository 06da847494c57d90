//! Pure codec for the MC protocol frame family. Frame construction and
//! response parsing only; no I/O and no shared state.

use crate::device::DeviceType;
use crate::error::{end_code_message, PlcError, PlcResult};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;

pub const SUBHEADER_3E: [u8; 2] = [0x50, 0x00];
pub const SUBHEADER_4E: [u8; 2] = [0x54, 0x00];

/// Batch read, word or bit unit. Encoded little-endian on the wire.
pub const CMD_BATCH_READ: u16 = 0x0401;
/// Batch write, word or bit unit.
pub const CMD_BATCH_WRITE: u16 = 0x1401;

/// Word-unit access subcommand for the MELSEC-Q/L profile.
pub const SUBCOMMAND: [u8; 2] = [0x00, 0x00];

/// Per-request monitoring timer, 0x0020 in ~250ms units.
pub const MONITORING_TIMER: [u8; 2] = [0x20, 0x00];

/// Protocol ceiling for word points in one batch request.
pub const MAX_WORDS_PER_REQUEST: usize = 960;
/// Protocol ceiling for bit points in one batch request.
pub const MAX_BITS_PER_REQUEST: usize = 7168;

/// Device numbers are encoded in three bytes.
const MAX_DEVICE_NUMBER: u32 = 0x00FF_FFFF;

/// The two wire-compatible envelope formats for the MC command set. 4E
/// carries additional routing/serial fields in front of the request body.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrameType {
    E3,
    E4,
}

impl FrameType {
    #[inline]
    fn subheader(self) -> [u8; 2] {
        match self {
            FrameType::E3 => SUBHEADER_3E,
            FrameType::E4 => SUBHEADER_4E,
        }
    }

    /// Offset of the request-data-length field in an outgoing frame.
    #[inline]
    pub fn length_field_offset(self) -> usize {
        match self {
            FrameType::E3 => 7,
            FrameType::E4 => 3,
        }
    }

    /// Offset the request-data-length is measured from.
    #[inline]
    pub fn body_offset(self) -> usize {
        match self {
            FrameType::E3 => 9,
            FrameType::E4 => 11,
        }
    }

    /// Minimum length of a response carrying an end code.
    #[inline]
    pub fn min_response_len(self) -> usize {
        match self {
            FrameType::E3 => 11,
            FrameType::E4 => 15,
        }
    }

    /// Offset of the little-endian end code in a response.
    #[inline]
    pub fn end_code_offset(self) -> usize {
        match self {
            FrameType::E3 => 9,
            FrameType::E4 => 11,
        }
    }

    /// Offset of the first payload byte in a read response.
    #[inline]
    pub fn payload_offset(self) -> usize {
        match self {
            FrameType::E3 => 11,
            FrameType::E4 => 15,
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameType::E3 => f.write_str("3E"),
            FrameType::E4 => f.write_str("4E"),
        }
    }
}

impl FromStr for FrameType {
    type Err = PlcError;

    fn from_str(name: &str) -> Result<FrameType, PlcError> {
        match name {
            "3E" => Ok(FrameType::E3),
            "4E" => Ok(FrameType::E4),
            _ => Err(PlcError::Device(format!("Unsupported frame type: {}", name))),
        }
    }
}

/// Access-path parameters bound at session construction and repeated
/// unchanged in every outgoing frame. The defaults address the CPU directly
/// on the local station.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AccessRoute {
    pub network_no: u8,
    pub pc_no: u8,
    pub unit_io: u16,
    pub unit_station: u8,
}

impl Default for AccessRoute {
    #[inline]
    fn default() -> AccessRoute {
        AccessRoute {
            network_no: 0,
            pc_no: 0xFF,
            unit_io: 0x03FF,
            unit_station: 0,
        }
    }
}

/// Starts a frame: subheader, access path, length placeholder and the
/// monitoring timer. The request body follows; `finish_frame` patches the
/// length field afterwards.
fn begin_frame(frame_type: FrameType, route: &AccessRoute) -> PlcResult<Vec<u8>> {
    let mut frame = Vec::with_capacity(64);
    frame.write_all(&frame_type.subheader())?;

    match frame_type {
        FrameType::E3 => {
            frame.write_u8(route.network_no)?;
            frame.write_u8(route.pc_no)?;
            frame.write_u16::<LittleEndian>(route.unit_io)?;
            frame.write_u8(route.unit_station)?;
            // Request data length, patched in finish_frame
            frame.write_u16::<LittleEndian>(0)?;
        }
        FrameType::E4 => {
            // Response and request data length placeholders. The request
            // length is patched at the offset pinned by length_field_offset.
            frame.write_all(&[0x00, 0x00, 0x00, 0x00])?;
            frame.write_u8(route.network_no)?;
            frame.write_u8(route.pc_no)?;
            // Destination CPU monitoring timer
            frame.write_all(&[0xFF, 0xFF])?;
            frame.write_u16::<LittleEndian>(route.unit_io)?;
            frame.write_u8(route.unit_station)?;
        }
    }

    frame.write_all(&MONITORING_TIMER)?;

    Ok(frame)
}

/// Back-patches the request-data-length field once the body is assembled.
fn finish_frame(frame: &mut [u8], frame_type: FrameType) {
    let body_len = (frame.len() - frame_type.body_offset()) as u16;
    let offset = frame_type.length_field_offset();
    LittleEndian::write_u16(&mut frame[offset..offset + 2], body_len);
}

/// Command, subcommand and head-device region shared by every batch request.
fn write_request_header(
    frame: &mut Vec<u8>,
    command: u16,
    device: DeviceType,
    number: u32,
    count: u16,
) -> PlcResult<()> {
    frame.write_u16::<LittleEndian>(command)?;
    frame.write_all(&SUBCOMMAND)?;
    frame.write_u24::<LittleEndian>(number)?;
    frame.write_u8(device.code())?;
    frame.write_u16::<LittleEndian>(count)?;
    Ok(())
}

fn check_device_number(device: DeviceType, number: u32) -> PlcResult<()> {
    if number > MAX_DEVICE_NUMBER {
        return Err(PlcError::Device(format!(
            "Device number out of range: {}{}",
            device, number
        )));
    }
    Ok(())
}

fn check_count(device: DeviceType, count: usize) -> PlcResult<()> {
    let max = if device.is_bit() {
        MAX_BITS_PER_REQUEST
    } else {
        MAX_WORDS_PER_REQUEST
    };

    if count == 0 || count > max {
        return Err(PlcError::Device(format!(
            "Element count out of range for {}: {} (max {})",
            device, count, max
        )));
    }
    Ok(())
}

/// Builds a batch read request for `count` points starting at
/// (`device`, `number`).
pub fn build_read_frame(
    device: DeviceType,
    number: u32,
    count: u16,
    frame_type: FrameType,
    route: &AccessRoute,
) -> PlcResult<Vec<u8>> {
    check_device_number(device, number)?;
    check_count(device, count as usize)?;

    let mut frame = begin_frame(frame_type, route)?;
    write_request_header(&mut frame, CMD_BATCH_READ, device, number, count)?;
    finish_frame(&mut frame, frame_type);

    Ok(frame)
}

/// Builds a batch write request carrying one little-endian word per point.
pub fn build_write_words_frame(
    device: DeviceType,
    number: u32,
    values: &[u16],
    frame_type: FrameType,
    route: &AccessRoute,
) -> PlcResult<Vec<u8>> {
    check_device_number(device, number)?;
    check_count(device, values.len())?;

    let mut frame = begin_frame(frame_type, route)?;
    write_request_header(&mut frame, CMD_BATCH_WRITE, device, number, values.len() as u16)?;

    for &value in values {
        frame.write_u16::<LittleEndian>(value)?;
    }

    finish_frame(&mut frame, frame_type);

    Ok(frame)
}

/// Builds a batch write request carrying one byte per point (0 or 1).
pub fn build_write_bits_frame(
    device: DeviceType,
    number: u32,
    values: &[bool],
    frame_type: FrameType,
    route: &AccessRoute,
) -> PlcResult<Vec<u8>> {
    check_device_number(device, number)?;
    check_count(device, values.len())?;

    let mut frame = begin_frame(frame_type, route)?;
    write_request_header(&mut frame, CMD_BATCH_WRITE, device, number, values.len() as u16)?;

    for &value in values {
        frame.write_u8(if value { 1 } else { 0 })?;
    }

    finish_frame(&mut frame, frame_type);

    Ok(frame)
}

/// Encodes a string for word storage: UTF-8 bytes padded so the total length
/// is even and ends with at least one NUL. Returns the padded bytes and the
/// word count.
pub fn encode_string(text: &str) -> (Vec<u8>, usize) {
    let mut bytes = text.as_bytes().to_vec();

    if bytes.len() % 2 == 1 {
        bytes.push(0);
    } else {
        bytes.extend_from_slice(&[0, 0]);
    }

    let word_count = bytes.len() / 2;
    (bytes, word_count)
}

/// Builds a word batch write request carrying a NUL-terminated string packed
/// two bytes per word, little-endian.
pub fn build_write_string_frame(
    device: DeviceType,
    number: u32,
    text: &str,
    frame_type: FrameType,
    route: &AccessRoute,
) -> PlcResult<Vec<u8>> {
    if device.is_bit() {
        return Err(PlcError::Device(format!(
            "String write is only supported for word devices: {}",
            device
        )));
    }
    check_device_number(device, number)?;

    let (bytes, word_count) = encode_string(text);
    check_count(device, word_count)?;

    let mut frame = begin_frame(frame_type, route)?;
    write_request_header(&mut frame, CMD_BATCH_WRITE, device, number, word_count as u16)?;
    frame.write_all(&bytes)?;
    finish_frame(&mut frame, frame_type);

    Ok(frame)
}

/// Number of words the session reads to recover a string of at most
/// `max_chars` UTF-8 characters.
#[inline]
pub fn string_read_word_count(max_chars: usize) -> usize {
    (max_chars * 3 + 1) / 2
}

/// Validates the framing-level shape of a response: minimum length, then the
/// end code. A non-zero end code maps to a communication error carrying the
/// standard description when the code is known, or the verbatim hex code
/// otherwise.
pub fn check_response(response: &[u8], frame_type: FrameType) -> PlcResult<()> {
    if response.len() < frame_type.min_response_len() {
        return Err(PlcError::Communication(format!(
            "Response too short: {} bytes",
            response.len()
        )));
    }

    let offset = frame_type.end_code_offset();
    let end_code = LittleEndian::read_u16(&response[offset..offset + 2]);

    if end_code != 0 {
        let description = match end_code_message(end_code) {
            Some(message) => message.to_owned(),
            None => format!("Unknown error code: 0x{:04X}", end_code),
        };
        return Err(PlcError::Communication(format!(
            "PLC returned error: {} (0x{:04X})",
            description, end_code
        )));
    }

    Ok(())
}

/// Decodes `count` little-endian words from a validated read response.
pub fn parse_word_response(
    response: &[u8],
    count: u16,
    frame_type: FrameType,
) -> PlcResult<Vec<u16>> {
    let offset = frame_type.payload_offset();
    let end = offset + count as usize * 2;

    if response.len() < end {
        return Err(PlcError::Communication(
            "Invalid response data: Data length is too short".to_owned(),
        ));
    }

    let mut cursor = Cursor::new(&response[offset..end]);
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(cursor.read_u16::<LittleEndian>()?);
    }

    Ok(values)
}

/// Decodes `count` bit points from a validated read response; any non-zero
/// byte reads as true.
pub fn parse_bit_response(
    response: &[u8],
    count: u16,
    frame_type: FrameType,
) -> PlcResult<Vec<bool>> {
    let offset = frame_type.payload_offset();
    let end = offset + count as usize;

    if response.len() < end {
        return Err(PlcError::Communication(
            "Invalid response data: Data length is too short".to_owned(),
        ));
    }

    Ok(response[offset..end].iter().map(|&byte| byte != 0).collect())
}

/// Recovers a string from word data: low byte then high byte per word,
/// truncated at the first NUL, decoded as UTF-8.
pub fn parse_string_data(words: &[u16]) -> PlcResult<String> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for &word in words {
        bytes.push((word & 0xFF) as u8);
        bytes.push((word >> 8) as u8);
    }

    let end = bytes.iter().position(|&byte| byte == 0).unwrap_or_else(|| bytes.len());
    bytes.truncate(end);

    String::from_utf8(bytes)
        .map_err(|err| PlcError::Encoding(format!("Invalid UTF-8 in string data: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    const ROUTE: AccessRoute = AccessRoute {
        network_no: 0,
        pc_no: 0xFF,
        unit_io: 0x03FF,
        unit_station: 0,
    };

    // First payload byte of a 3E write request: 9 header + 2 timer + 2 command
    // + 2 subcommand + 3 device number + 1 device code + 2 count.
    const WRITE_PAYLOAD_OFFSET_3E: usize = 21;

    #[test]
    fn test_build_read_frame_3e() {
        let frame = build_read_frame(DeviceType::D, 100, 10, FrameType::E3, &ROUTE).unwrap();

        assert_eq!(
            frame,
            vec![
                0x50, 0x00, // subheader
                0x00, 0xFF, 0xFF, 0x03, 0x00, // access path
                0x0C, 0x00, // request data length
                0x20, 0x00, // monitoring timer
                0x01, 0x04, // command
                0x00, 0x00, // subcommand
                0x64, 0x00, 0x00, // head device number
                0xA8, // device code
                0x0A, 0x00, // element count
            ]
        );
    }

    #[test]
    fn test_build_read_frame_4e() {
        let frame = build_read_frame(DeviceType::D, 100, 10, FrameType::E4, &ROUTE).unwrap();

        assert_eq!(
            frame,
            vec![
                0x54, 0x00, // subheader
                0x00, 0x0E, 0x00, 0x00, // length placeholders, patched at [3..5)
                0x00, 0xFF, // network, pc
                0xFF, 0xFF, // destination CPU monitoring timer
                0xFF, 0x03, // unit i/o
                0x00, // unit station
                0x20, 0x00, // monitoring timer
                0x01, 0x04, // command
                0x00, 0x00, // subcommand
                0x64, 0x00, 0x00, // head device number
                0xA8, // device code
                0x0A, 0x00, // element count
            ]
        );
    }

    #[test]
    fn test_request_length_field() {
        for &frame_type in &[FrameType::E3, FrameType::E4] {
            let frame =
                build_write_words_frame(DeviceType::D, 0, &[1, 2, 3], frame_type, &ROUTE).unwrap();
            let offset = frame_type.length_field_offset();
            let length = LittleEndian::read_u16(&frame[offset..offset + 2]) as usize;

            assert_eq!(length, frame.len() - frame_type.body_offset());
        }
    }

    #[test]
    fn test_build_write_words_frame() {
        let frame =
            build_write_words_frame(DeviceType::D, 200, &[0x1234, 0xABCD], FrameType::E3, &ROUTE)
                .unwrap();

        // Command is batch write
        assert_eq!(&frame[11..13], &[0x01, 0x14]);
        // Head device 200 = 0x0000C8
        assert_eq!(&frame[15..18], &[0xC8, 0x00, 0x00]);
        assert_eq!(frame[18], 0xA8);
        assert_eq!(&frame[19..21], &[0x02, 0x00]);
        assert_eq!(&frame[WRITE_PAYLOAD_OFFSET_3E..], &[0x34, 0x12, 0xCD, 0xAB]);
    }

    #[test]
    fn test_build_write_bits_frame() {
        let frame = build_write_bits_frame(
            DeviceType::M,
            5,
            &[true, false, true],
            FrameType::E3,
            &ROUTE,
        )
        .unwrap();

        assert_eq!(&frame[11..13], &[0x01, 0x14]);
        assert_eq!(&frame[15..18], &[0x05, 0x00, 0x00]);
        assert_eq!(frame[18], 0x90);
        assert_eq!(&frame[19..21], &[0x03, 0x00]);
        assert_eq!(&frame[WRITE_PAYLOAD_OFFSET_3E..], &[0x01, 0x00, 0x01]);
    }

    #[test]
    fn test_write_words_roundtrip() {
        let mut rng = rand::thread_rng();
        let values: Vec<u16> = (0..32).map(|_| rng.gen()).collect();

        let frame =
            build_write_words_frame(DeviceType::D, 0, &values, FrameType::E3, &ROUTE).unwrap();

        let mut recovered = Vec::with_capacity(values.len());
        let mut cursor = Cursor::new(&frame[WRITE_PAYLOAD_OFFSET_3E..]);
        for _ in 0..values.len() {
            recovered.push(cursor.read_u16::<LittleEndian>().unwrap());
        }

        assert_eq!(recovered, values);
    }

    #[test]
    fn test_read_parse_shape_roundtrip() {
        // A read request for n points pairs with a response of n payload
        // items at the framing-dependent offset.
        for &frame_type in &[FrameType::E3, FrameType::E4] {
            let count = 4u16;
            build_read_frame(DeviceType::D, 0, count, frame_type, &ROUTE).unwrap();

            let mut response = vec![0u8; frame_type.payload_offset()];
            for value in 0..count {
                response.push(value as u8);
                response.push(0);
            }

            let words = parse_word_response(&response, count, frame_type).unwrap();
            assert_eq!(words, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_parse_word_response_3e() {
        let response = [
            0x50, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02,
            0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0x00,
        ];

        check_response(&response, FrameType::E3).unwrap();
        let values = parse_word_response(&response, 5, FrameType::E3).unwrap();

        assert_eq!(values, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parse_word_response_short() {
        let response = [0x50, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01];

        let result = parse_word_response(&response, 5, FrameType::E3);

        match result {
            Err(PlcError::Communication(message)) => assert!(message.contains("too short")),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_bit_response() {
        let mut response = vec![0u8; FrameType::E3.payload_offset()];
        response.extend_from_slice(&[0x00, 0x01, 0x02, 0x00, 0x01]);

        let values = parse_bit_response(&response, 5, FrameType::E3).unwrap();

        assert_eq!(values, vec![false, true, true, false, true]);
    }

    #[test]
    fn test_check_response_end_code() {
        let response = [0x50, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x02, 0x00, 0x59, 0xC0];

        let result = check_response(&response, FrameType::E3);

        match result {
            Err(PlcError::Communication(message)) => {
                assert!(message.contains("0xC059"));
                assert!(message.contains("invalid specification of data count"));
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_check_response_unknown_end_code() {
        let response = [0x50, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x02, 0x00, 0x34, 0x12];

        let result = check_response(&response, FrameType::E3);

        match result {
            Err(PlcError::Communication(message)) => {
                assert!(message.contains("Unknown error code: 0x1234"))
            }
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_check_response_too_short() {
        let result = check_response(&[0x50, 0x00, 0x00], FrameType::E3);

        match result {
            Err(PlcError::Communication(message)) => assert!(message.contains("Response too short")),
            other => panic!("Unexpected result {:?}", other),
        }

        // 4E needs 15 bytes even though the end code sits at offset 11
        let result = check_response(&[0u8; 14], FrameType::E4);
        assert!(result.is_err());
        assert!(check_response(&[0u8; 15], FrameType::E4).is_ok());
    }

    #[test]
    fn test_encode_string_padding() {
        // Odd byte count gets a single NUL
        let (bytes, words) = encode_string("Hello");
        assert_eq!(bytes, b"Hello\x00");
        assert_eq!(words, 3);

        // Even byte count gets a NUL pair
        let (bytes, words) = encode_string("Hi");
        assert_eq!(bytes, b"Hi\x00\x00");
        assert_eq!(words, 2);

        let (bytes, words) = encode_string("");
        assert_eq!(bytes, b"\x00\x00");
        assert_eq!(words, 1);
    }

    #[test]
    fn test_build_write_string_frame() {
        let frame =
            build_write_string_frame(DeviceType::D, 300, "Hello", FrameType::E3, &ROUTE).unwrap();

        // 300 = 0x00012C
        assert_eq!(&frame[15..18], &[0x2C, 0x01, 0x00]);
        // Three words including the trailing NUL
        assert_eq!(&frame[19..21], &[0x03, 0x00]);
        assert_eq!(&frame[WRITE_PAYLOAD_OFFSET_3E..], b"Hello\x00");
    }

    #[test]
    fn test_write_string_rejects_bit_device() {
        let result = build_write_string_frame(DeviceType::M, 0, "Hello", FrameType::E3, &ROUTE);

        match result {
            Err(PlcError::Device(message)) => assert!(message.contains("word devices")),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_string_data() {
        // "Hello" packed little-endian: He ll o\0
        let words = [0x6548, 0x6C6C, 0x006F];
        assert_eq!(parse_string_data(&words).unwrap(), "Hello");

        // Embedded NUL truncates
        let words = [0x0048, 0x0069];
        assert_eq!(parse_string_data(&words).unwrap(), "H");

        // No NUL at all consumes every byte
        let words = [0x6241];
        assert_eq!(parse_string_data(&words).unwrap(), "Ab");
    }

    #[test]
    fn test_parse_string_invalid_utf8() {
        let result = parse_string_data(&[0x41FF]);

        match result {
            Err(PlcError::Encoding(message)) => assert!(message.contains("UTF-8")),
            other => panic!("Unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_string_roundtrip() {
        for text in &["Hello", "Hi", "temperature: 42\u{00B0}", ""] {
            let (bytes, word_count) = encode_string(text);

            let mut words = Vec::with_capacity(word_count);
            for pair in bytes.chunks(2) {
                words.push(u16::from(pair[0]) | (u16::from(pair[1]) << 8));
            }

            assert_eq!(parse_string_data(&words).unwrap(), *text);
        }
    }

    #[test]
    fn test_count_limits() {
        assert!(build_read_frame(DeviceType::D, 0, 0, FrameType::E3, &ROUTE).is_err());
        assert!(build_read_frame(DeviceType::D, 0, 960, FrameType::E3, &ROUTE).is_ok());
        assert!(build_read_frame(DeviceType::D, 0, 961, FrameType::E3, &ROUTE).is_err());

        assert!(build_read_frame(DeviceType::M, 0, 7168, FrameType::E3, &ROUTE).is_ok());
        assert!(build_read_frame(DeviceType::M, 0, 7169, FrameType::E3, &ROUTE).is_err());
    }

    #[test]
    fn test_device_number_limit() {
        assert!(build_read_frame(DeviceType::D, 0x00FF_FFFF, 1, FrameType::E3, &ROUTE).is_ok());
        assert!(build_read_frame(DeviceType::D, 0x0100_0000, 1, FrameType::E3, &ROUTE).is_err());
    }

    #[test]
    fn test_string_read_word_count() {
        assert_eq!(string_read_word_count(1), 2);
        assert_eq!(string_read_word_count(10), 15);
        assert_eq!(string_read_word_count(80), 120);
    }

    #[test]
    fn test_frame_type_parse() {
        assert_eq!("3E".parse::<FrameType>().unwrap(), FrameType::E3);
        assert_eq!("4E".parse::<FrameType>().unwrap(), FrameType::E4);
        assert!("5E".parse::<FrameType>().is_err());

        assert_eq!(FrameType::E3.to_string(), "3E");
        assert_eq!(FrameType::E4.to_string(), "4E");
    }
}
