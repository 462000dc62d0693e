// src/protocol/mod.rs - CloudWatcher block protocol codec
//
// The device speaks a fixed textual grammar: every command is a single code
// character plus optional parameters, terminated by '!'. Every response is a
// run of 15-character blocks, each `'!'` + 2-character response code +
// 12-character data field, closed by a handshake block. Command shapes are
// table-driven so the codec can be tested without a device.
use crate::hardware::{Transport, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Length of one response block, including the leading '!'.
pub const BLOCK_LEN: usize = 15;

/// Width of the data field inside a block.
pub const DATA_LEN: usize = 12;

/// Handshake block closing every response: '!', DC1, 12 spaces, '0'.
pub const HANDSHAKE: &[u8; BLOCK_LEN] = b"!\x11            0";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Malformed frame: {0}")]
    Framing(String),
    #[error("Transport error: {0}")]
    Transport(TransportError),
}

/// Command set from the CloudWatcher RS232 documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetInternalName,
    GetFirmware,
    GetValues,
    GetInternalErrors,
    GetRainFrequency,
    GetSwitchStatus,
    SetSwitchOpen,
    SetSwitchClosed,
    GetSerialNumber,
    /// Set heater duty cycle, raw code 0..=1023.
    SetPwm(u16),
    GetPwm,
    GetSkyTemp,
    GetAmbientTemp,
    CanGetWindSpeed,
    GetWindSpeed,
    ResetBuffers,
}

impl Command {
    /// Command code character written to the wire.
    pub fn code(&self) -> char {
        match self {
            Command::GetInternalName => 'A',
            Command::GetFirmware => 'B',
            Command::GetValues => 'C',
            Command::GetInternalErrors => 'D',
            Command::GetRainFrequency => 'E',
            Command::GetSwitchStatus => 'F',
            Command::SetSwitchOpen => 'G',
            Command::SetSwitchClosed => 'H',
            Command::GetSerialNumber => 'K',
            Command::SetPwm(_) => 'P',
            Command::GetPwm => 'Q',
            Command::GetSkyTemp => 'S',
            Command::GetAmbientTemp => 'T',
            Command::CanGetWindSpeed => 'v',
            Command::GetWindSpeed => 'V',
            Command::ResetBuffers => 'z',
        }
    }

    /// Fixed-width parameter string, if the command carries one.
    pub fn params(&self) -> Option<String> {
        match self {
            Command::SetPwm(duty) => Some(format!("{:04}", (*duty).min(1023))),
            _ => None,
        }
    }

    /// Expected number of information blocks, excluding the handshake.
    pub fn expected_blocks(&self) -> usize {
        match self {
            Command::ResetBuffers => 0,
            Command::GetValues | Command::GetInternalErrors => 4,
            _ => 1,
        }
    }

    /// Full command string as written to the device.
    pub fn wire_form(&self) -> String {
        let mut wire = String::with_capacity(8);
        wire.push(self.code());
        if let Some(params) = self.params() {
            wire.push_str(&params);
        }
        wire.push('!');
        wire
    }
}

/// One information block from a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Two-character response code, e.g. "1 " or "E2".
    pub code: String,
    /// Twelve-character data field, unstripped.
    pub data: String,
}

impl Block {
    /// Data field parsed as a decimal integer.
    pub fn value_i32(&self) -> Result<i32, ProtocolError> {
        self.data.trim().parse::<i32>().map_err(|_| {
            ProtocolError::Framing(format!(
                "block '{}' data {:?} is not a decimal integer",
                self.code, self.data
            ))
        })
    }

    /// Data field with surrounding whitespace removed.
    pub fn text(&self) -> &str {
        self.data.trim()
    }
}

/// Validated response frame for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub blocks: Vec<Block>,
}

impl RawFrame {
    /// Parse raw bytes into a frame with exactly `expected_blocks` information
    /// blocks plus the handshake. The device can leave stale bytes in its
    /// buffer, so anything before the first '!' is dropped; from there the
    /// frame must parse exactly. Truncated or padded tokens indicate
    /// desynchronization and are rejected, never silently parsed.
    pub fn parse(bytes: &[u8], expected_blocks: usize) -> Result<Self, ProtocolError> {
        let start = bytes
            .iter()
            .position(|&b| b == b'!')
            .ok_or_else(|| ProtocolError::Framing("no block delimiter in response".into()))?;
        let frame = &bytes[start..];

        if frame.len() % BLOCK_LEN != 0 {
            return Err(ProtocolError::Framing(format!(
                "frame length {} is not a multiple of {BLOCK_LEN}",
                frame.len()
            )));
        }
        let total_blocks = frame.len() / BLOCK_LEN;
        if total_blocks != expected_blocks + 1 {
            return Err(ProtocolError::Framing(format!(
                "expected {} blocks plus handshake, got {total_blocks}",
                expected_blocks
            )));
        }

        let mut chunks: Vec<&[u8]> = frame.chunks_exact(BLOCK_LEN).collect();
        let handshake = match chunks.pop() {
            Some(chunk) => chunk,
            None => return Err(ProtocolError::Framing("empty frame".into())),
        };
        if handshake != HANDSHAKE {
            return Err(ProtocolError::Framing(format!(
                "invalid handshake block {:?}",
                String::from_utf8_lossy(handshake)
            )));
        }

        let mut blocks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk[0] != b'!' {
                return Err(ProtocolError::Framing(format!(
                    "block does not start with '!': {:?}",
                    String::from_utf8_lossy(chunk)
                )));
            }
            let code = std::str::from_utf8(&chunk[1..3])
                .map_err(|_| ProtocolError::Framing("non-ASCII response code".into()))?;
            let data = std::str::from_utf8(&chunk[3..BLOCK_LEN])
                .map_err(|_| ProtocolError::Framing("non-ASCII data field".into()))?;
            blocks.push(Block {
                code: code.to_string(),
                data: data.to_string(),
            });
        }
        Ok(Self { blocks })
    }

    /// The first information block, for one-block replies whose response
    /// code varies (switch status, serial number).
    pub fn first_block(&self) -> Result<&Block, ProtocolError> {
        self.blocks
            .first()
            .ok_or_else(|| ProtocolError::Framing("empty frame".into()))
    }

    /// The single information block of a one-block reply, validated against
    /// the expected response code.
    pub fn single(&self, expect_code: &str) -> Result<&Block, ProtocolError> {
        let block = self.first_block()?;
        if block.code != expect_code {
            return Err(ProtocolError::Framing(format!(
                "expected response code {expect_code:?}, got {:?}",
                block.code
            )));
        }
        Ok(block)
    }

    /// Integer value of a one-block reply.
    pub fn single_i32(&self, expect_code: &str) -> Result<i32, ProtocolError> {
        self.single(expect_code)?.value_i32()
    }

    /// Integer value of the block carrying `code` in a multi-block reply.
    pub fn code_i32(&self, code: &str) -> Result<i32, ProtocolError> {
        self.blocks
            .iter()
            .find(|b| b.code == code)
            .ok_or_else(|| {
                ProtocolError::Framing(format!("no block with response code {code:?}"))
            })?
            .value_i32()
    }

    /// Serial number digits from a GetSerialNumber reply. The device packs
    /// the digits directly after the 'K' code character, so this block does
    /// not follow the two-character-code convention.
    pub fn serial_number(&self) -> Result<String, ProtocolError> {
        let block = self.first_block()?;
        if !block.code.starts_with('K') {
            return Err(ProtocolError::Framing(format!(
                "expected serial number block, got code {:?}",
                block.code
            )));
        }
        let mut digits: String = block.code[1..].to_string();
        digits.push_str(&block.data);
        let digits: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(ProtocolError::Framing("serial number block has no digits".into()));
        }
        Ok(digits)
    }
}

/// Stateless framing codec. Retry policy lives in the aggregator, not here.
#[derive(Debug, Clone)]
pub struct Codec {
    timeout: Duration,
}

impl Codec {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one command and read its complete response frame.
    pub async fn exchange<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        cmd: Command,
    ) -> Result<RawFrame, ProtocolError> {
        let wire = cmd.wire_form();
        tracing::debug!("Device <- {:?}", wire);
        transport
            .write(wire.as_bytes())
            .await
            .map_err(ProtocolError::Transport)?;

        let bytes = transport
            .read_until(HANDSHAKE, self.timeout)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => ProtocolError::Timeout(self.timeout),
                other => ProtocolError::Transport(other),
            })?;
        tracing::debug!("Device -> {:?}", String::from_utf8_lossy(&bytes));

        RawFrame::parse(&bytes, cmd.expected_blocks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(code: &str, value: &str) -> Vec<u8> {
        assert_eq!(code.len(), 2);
        format!("!{code}{value:>12}").into_bytes()
    }

    fn frame(blocks: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for b in blocks {
            bytes.extend_from_slice(b);
        }
        bytes.extend_from_slice(HANDSHAKE);
        bytes
    }

    #[test]
    fn wire_forms_match_device_grammar() {
        assert_eq!(Command::GetSkyTemp.wire_form(), "S!");
        assert_eq!(Command::SetPwm(102).wire_form(), "P0102!");
        assert_eq!(Command::SetPwm(2000).wire_form(), "P1023!");
        assert_eq!(Command::ResetBuffers.wire_form(), "z!");
    }

    #[test]
    fn parses_single_block_reply() {
        let bytes = frame(&[block("1 ", "-512")]);
        let parsed = RawFrame::parse(&bytes, 1).unwrap();
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.single_i32("1 ").unwrap(), -512);
    }

    #[test]
    fn parses_multi_block_reply_by_code() {
        let bytes = frame(&[
            block("6 ", "620"),
            block("3 ", "400"),
            block("4 ", "700"),
            block("5 ", "512"),
        ]);
        let parsed = RawFrame::parse(&bytes, 4).unwrap();
        assert_eq!(parsed.code_i32("6 ").unwrap(), 620);
        assert_eq!(parsed.code_i32("5 ").unwrap(), 512);
        assert!(parsed.code_i32("9 ").is_err());
    }

    #[test]
    fn drops_leading_noise() {
        let mut bytes = b"\r\n\x00garbage".to_vec();
        bytes.extend_from_slice(&frame(&[block("R ", "2875")]));
        let parsed = RawFrame::parse(&bytes, 1).unwrap();
        assert_eq!(parsed.single_i32("R ").unwrap(), 2875);
    }

    #[test]
    fn wrong_block_count_is_framing_error() {
        let bytes = frame(&[block("1 ", "100")]);
        let err = RawFrame::parse(&bytes, 2).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(_)));
    }

    #[test]
    fn truncated_block_is_framing_error() {
        let mut bytes = frame(&[block("1 ", "100")]);
        bytes.remove(4); // shave one byte out of the data field
        let err = RawFrame::parse(&bytes, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(_)));
    }

    #[test]
    fn missing_handshake_is_framing_error() {
        let mut bytes = block("1 ", "100");
        bytes.extend_from_slice(&block("2 ", "200"));
        let err = RawFrame::parse(&bytes, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::Framing(_)));
    }

    #[test]
    fn non_numeric_data_is_rejected_for_numeric_fields() {
        let bytes = frame(&[block("1 ", "12x4")]);
        let parsed = RawFrame::parse(&bytes, 1).unwrap();
        assert!(matches!(
            parsed.single_i32("1 "),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn mismatched_response_code_is_rejected() {
        let bytes = frame(&[block("2 ", "1550")]);
        let parsed = RawFrame::parse(&bytes, 1).unwrap();
        assert!(parsed.single_i32("1 ").is_err());
    }

    #[test]
    fn empty_frame_has_no_first_block() {
        let frame = RawFrame { blocks: Vec::new() };
        assert!(matches!(frame.first_block(), Err(ProtocolError::Framing(_))));
        assert!(frame.serial_number().is_err());
    }

    #[test]
    fn serial_number_block_parses_packed_digits() {
        let bytes = frame(&[b"!K12345678   \x000".to_vec()]);
        let parsed = RawFrame::parse(&bytes, 1).unwrap();
        assert_eq!(parsed.serial_number().unwrap(), "12345678");
    }
}
