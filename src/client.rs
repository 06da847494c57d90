//! Session layer: owns one TCP connection to a PLC endpoint, serialises one
//! request/response exchange at a time and recovers from transport failures
//! by reconnecting on the next call.

use crate::device::{DeviceType, Value};
use crate::error::{PlcError, PlcResult};
use crate::logging::{self, debug, trace, Logger};
use crate::protocol::{self, AccessRoute, FrameType};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

const RECV_BUFFER_SIZE: usize = 1024;

/// Session parameters bound at construction. The defaults target a single
/// local-station CPU over the 3E framing with a one second timeout.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub auto_reconnect: bool,
    pub frame_type: FrameType,
    pub route: AccessRoute,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(1),
            auto_reconnect: true,
            frame_type: FrameType::E3,
            route: AccessRoute::default(),
        }
    }
}

/// A client session against one PLC endpoint.
///
/// All I/O happens on the calling thread with at most one request in flight.
/// Transport failures mark the session disconnected and surface to the
/// caller; the next operation reconnects when auto-reconnect is enabled. The
/// failed operation itself is never retried internally, since the caller
/// must decide whether a retry is safe.
pub struct PlcClient {
    host: String,
    port: u16,
    config: ClientConfig,
    stream: Option<TcpStream>,
    connected: bool,
    closed: bool,
    log: Logger,
}

impl PlcClient {
    /// Connects with the default configuration and no logger.
    pub fn connect(host: &str, port: u16) -> PlcResult<PlcClient> {
        PlcClient::connect_with(host, port, ClientConfig::default(), None)
    }

    /// Connects with an explicit configuration. The connection is opened
    /// eagerly; a failure here surfaces as a communication error.
    pub fn connect_with<'a, L: Into<Option<&'a Logger>>>(
        host: &str,
        port: u16,
        config: ClientConfig,
        log: L,
    ) -> PlcResult<PlcClient> {
        let mut client = PlcClient {
            host: host.to_owned(),
            port,
            config,
            stream: None,
            connected: false,
            closed: false,
            log: logging::unwrap_or_discard(log.into()),
        };

        client.open_stream()?;

        Ok(client)
    }

    /// The framing variant bound to this session.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.config.frame_type
    }

    /// Whether the transport is currently open.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Releases the transport. Terminal: subsequent operations fail with a
    /// session error.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected = false;
        self.closed = true;

        debug!(self.log, "session closed";
               "context" => "close",
               "host" => %self.host,
               "port" => self.port);
    }

    fn resolve(&self) -> PlcResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| {
                PlcError::Communication(format!(
                    "Failed to resolve PLC address {}:{}: {}",
                    self.host, self.port, err
                ))
            })?
            .next()
            .ok_or_else(|| {
                PlcError::Communication(format!(
                    "No addresses for PLC host {}:{}",
                    self.host, self.port
                ))
            })
    }

    /// Opens a fresh TCP connection and applies the configured timeout to
    /// connect, send and receive.
    fn open_stream(&mut self) -> PlcResult<()> {
        self.drop_stream();

        let address = self.resolve()?;
        let stream = TcpStream::connect_timeout(&address, self.config.timeout).map_err(|err| {
            let message = format!("Failed to connect to PLC: {}:{}: {}", self.host, self.port, err);
            match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PlcError::Timeout(message),
                _ => PlcError::Communication(message),
            }
        })?;

        stream.set_read_timeout(Some(self.config.timeout))?;
        stream.set_write_timeout(Some(self.config.timeout))?;

        self.stream = Some(stream);
        self.connected = true;

        debug!(self.log, "connected to plc";
               "context" => "connect",
               "host" => %self.host,
               "port" => self.port,
               "frame_type" => %self.config.frame_type);

        Ok(())
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected = false;
    }

    /// Marks the session disconnected when the error is transport-level and
    /// hands the error back.
    fn mark_failed(&mut self, err: PlcError) -> PlcError {
        if err.is_communication() {
            self.drop_stream();
        }
        err
    }

    fn transfer(&mut self, frame: &[u8]) -> io::Result<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .expect("connected session must have a stream");

        stream.write_all(frame)?;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let received = stream.read(&mut buffer)?;

        Ok(buffer[..received].to_vec())
    }

    /// One request/response exchange: transmit the whole frame, receive the
    /// response, validate length and end code. Reconnects first when the
    /// session was marked disconnected by an earlier failure.
    fn exchange(&mut self, frame: &[u8]) -> PlcResult<Vec<u8>> {
        if self.closed {
            return Err(PlcError::Closed);
        }

        if !self.connected {
            if !self.config.auto_reconnect {
                return Err(PlcError::Communication(
                    "Session is disconnected and auto-reconnect is disabled".to_owned(),
                ));
            }
            self.open_stream()?;
        }

        trace!(self.log, "sending request";
               "context" => "exchange",
               "frame_len" => frame.len());

        let response = match self.transfer(frame) {
            Ok(response) => response,
            Err(err) => {
                self.drop_stream();
                return Err(err.into());
            }
        };

        if response.is_empty() {
            self.drop_stream();
            return Err(PlcError::Communication("Connection closed by peer".to_owned()));
        }

        if let Err(err) = protocol::check_response(&response, self.config.frame_type) {
            self.drop_stream();
            return Err(err);
        }

        trace!(self.log, "received response";
               "context" => "exchange",
               "response_len" => response.len());

        Ok(response)
    }

    /// Reads `count` points, returning tagged values matching the device
    /// kind: booleans for bit classes, words otherwise.
    pub fn read_points(
        &mut self,
        device: DeviceType,
        number: u32,
        count: u16,
    ) -> PlcResult<Vec<Value>> {
        let frame = protocol::build_read_frame(
            device,
            number,
            count,
            self.config.frame_type,
            &self.config.route,
        )?;
        let response = self.exchange(&frame)?;

        if device.is_bit() {
            let bits = protocol::parse_bit_response(&response, count, self.config.frame_type)
                .map_err(|err| self.mark_failed(err))?;
            Ok(bits.into_iter().map(Value::Bit).collect())
        } else {
            let words = protocol::parse_word_response(&response, count, self.config.frame_type)
                .map_err(|err| self.mark_failed(err))?;
            Ok(words.into_iter().map(Value::Word).collect())
        }
    }

    /// Reads a single point.
    pub fn read_point(&mut self, device: DeviceType, number: u32) -> PlcResult<Value> {
        let mut values = self.read_points(device, number, 1)?;
        values
            .pop()
            .ok_or_else(|| PlcError::Communication("Empty response payload".to_owned()))
    }

    /// Writes tagged values to `count` consecutive points. Every value must
    /// match the device kind.
    pub fn write_points(
        &mut self,
        device: DeviceType,
        number: u32,
        values: &[Value],
    ) -> PlcResult<()> {
        if device.is_bit() {
            let mut bits = Vec::with_capacity(values.len());
            for value in values {
                bits.push(value.as_bit().ok_or_else(|| {
                    PlcError::Device(format!("Word value written to bit device {}", device))
                })?);
            }
            self.write_bits(device, number, &bits)
        } else {
            let mut words = Vec::with_capacity(values.len());
            for value in values {
                words.push(value.as_word().ok_or_else(|| {
                    PlcError::Device(format!("Bit value written to word device {}", device))
                })?);
            }
            self.write_words(device, number, &words)
        }
    }

    /// Writes a single point.
    pub fn write_point(&mut self, device: DeviceType, number: u32, value: Value) -> PlcResult<()> {
        self.write_points(device, number, &[value])
    }

    /// Reads `count` words from a word class.
    pub fn read_words(
        &mut self,
        device: DeviceType,
        number: u32,
        count: u16,
    ) -> PlcResult<Vec<u16>> {
        if device.is_bit() {
            return Err(PlcError::Device(format!(
                "Only word devices can be read with read_words: {}",
                device
            )));
        }

        let frame = protocol::build_read_frame(
            device,
            number,
            count,
            self.config.frame_type,
            &self.config.route,
        )?;
        let response = self.exchange(&frame)?;

        protocol::parse_word_response(&response, count, self.config.frame_type)
            .map_err(|err| self.mark_failed(err))
    }

    /// Reads a single word.
    pub fn read_word(&mut self, device: DeviceType, number: u32) -> PlcResult<u16> {
        let mut values = self.read_words(device, number, 1)?;
        values
            .pop()
            .ok_or_else(|| PlcError::Communication("Empty response payload".to_owned()))
    }

    /// Reads `count` bits from a bit class.
    pub fn read_bits(
        &mut self,
        device: DeviceType,
        number: u32,
        count: u16,
    ) -> PlcResult<Vec<bool>> {
        if !device.is_bit() {
            return Err(PlcError::Device(format!(
                "Only bit devices can be read with read_bits: {}",
                device
            )));
        }

        let frame = protocol::build_read_frame(
            device,
            number,
            count,
            self.config.frame_type,
            &self.config.route,
        )?;
        let response = self.exchange(&frame)?;

        protocol::parse_bit_response(&response, count, self.config.frame_type)
            .map_err(|err| self.mark_failed(err))
    }

    /// Reads a single bit.
    pub fn read_bit(&mut self, device: DeviceType, number: u32) -> PlcResult<bool> {
        let mut values = self.read_bits(device, number, 1)?;
        values
            .pop()
            .ok_or_else(|| PlcError::Communication("Empty response payload".to_owned()))
    }

    /// Writes words to consecutive points of a word class. The batch is
    /// atomic from the PLC's perspective.
    pub fn write_words(
        &mut self,
        device: DeviceType,
        number: u32,
        values: &[u16],
    ) -> PlcResult<()> {
        if device.is_bit() {
            return Err(PlcError::Device(format!(
                "Only word devices can be written with write_words: {}",
                device
            )));
        }

        let frame = protocol::build_write_words_frame(
            device,
            number,
            values,
            self.config.frame_type,
            &self.config.route,
        )?;
        self.exchange(&frame)?;

        Ok(())
    }

    /// Writes a single word.
    pub fn write_word(&mut self, device: DeviceType, number: u32, value: u16) -> PlcResult<()> {
        self.write_words(device, number, &[value])
    }

    /// Writes bits to consecutive points of a bit class.
    pub fn write_bits(
        &mut self,
        device: DeviceType,
        number: u32,
        values: &[bool],
    ) -> PlcResult<()> {
        if !device.is_bit() {
            return Err(PlcError::Device(format!(
                "Only bit devices can be written with write_bits: {}",
                device
            )));
        }

        let frame = protocol::build_write_bits_frame(
            device,
            number,
            values,
            self.config.frame_type,
            &self.config.route,
        )?;
        self.exchange(&frame)?;

        Ok(())
    }

    /// Writes a single bit.
    pub fn write_bit(&mut self, device: DeviceType, number: u32, value: bool) -> PlcResult<()> {
        self.write_bits(device, number, &[value])
    }

    /// Reads a NUL-terminated string of at most `max_chars` UTF-8 characters
    /// from a word class. The word budget is sized conservatively at
    /// ceil((max_chars * 3 + 1) / 2).
    pub fn read_string(
        &mut self,
        device: DeviceType,
        number: u32,
        max_chars: usize,
    ) -> PlcResult<String> {
        if device.is_bit() {
            return Err(PlcError::Device(format!(
                "String reading is only supported for word devices: {}",
                device
            )));
        }

        let word_count = protocol::string_read_word_count(max_chars);
        if word_count == 0 || word_count > protocol::MAX_WORDS_PER_REQUEST {
            return Err(PlcError::Device(format!(
                "String length out of range: {} chars",
                max_chars
            )));
        }

        let words = self.read_words(device, number, word_count as u16)?;
        protocol::parse_string_data(&words)
    }

    /// Writes a string to a word class, packed two bytes per word and
    /// NUL-terminated.
    pub fn write_string(&mut self, device: DeviceType, number: u32, text: &str) -> PlcResult<()> {
        let frame = protocol::build_write_string_frame(
            device,
            number,
            text,
            self.config.frame_type,
            &self.config.route,
        )?;
        self.exchange(&frame)?;

        Ok(())
    }
}

impl Drop for PlcClient {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
