//! Line-oriented readers built on [`RobustPort`].

use super::port_trait::PortOpener;
use super::RobustPort;

/// Which decoded lines a reader keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFilter {
    /// NMEA sentences only (`$`-prefixed), as sent by GPS receivers
    Nmea,
    /// Any non-empty line
    Any,
}

impl LineFilter {
    fn accepts(&self, line: &str) -> bool {
        match self {
            LineFilter::Nmea => line.starts_with('$'),
            LineFilter::Any => !line.is_empty(),
        }
    }
}

/// Decodes a [`RobustPort`] byte stream into trimmed text lines.
#[derive(Debug)]
pub struct LineReader<O: PortOpener> {
    port: RobustPort<O>,
    filter: LineFilter,
}

impl<O: PortOpener> LineReader<O> {
    pub fn new(port: RobustPort<O>, filter: LineFilter) -> Self {
        Self { port, filter }
    }

    /// Next accepted line, or `None` when nothing usable arrived this read.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Option<String> {
        let bytes = self.port.readline()?;
        let line = String::from_utf8_lossy(&bytes).trim().to_string();
        self.filter.accepts(&line).then_some(line)
    }

    pub fn port(&self) -> &RobustPort<O> {
        &self.port
    }

    pub fn close(&mut self) {
        self.port.close();
    }
}

/// LoRa radio module on a serial link: send and receive text lines.
#[derive(Debug)]
pub struct LoraLink<O: PortOpener> {
    reader: LineReader<O>,
}

impl<O: PortOpener> LoraLink<O> {
    pub fn new(port: RobustPort<O>) -> Self {
        Self {
            reader: LineReader::new(port, LineFilter::Any),
        }
    }

    /// Sends one CRLF-terminated line. `true` if it was written.
    pub fn write_line(&mut self, text: &str) -> bool {
        self.reader.port.write_line(text)
    }

    pub fn read_line(&mut self) -> Option<String> {
        self.reader.next_line()
    }

    pub fn close(&mut self) {
        self.reader.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::serial::policy::PolicySettings;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn port(device: &MockSerialPort) -> RobustPort<MockSerialPort> {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
        ));
        RobustPort::new(device.clone(), PolicySettings::default(), clock)
    }

    #[test]
    fn test_nmea_filter_drops_noise() {
        let device = MockSerialPort::new();
        device.set_available(true);
        device.push_line(b"\x00garbage\r\n");
        device.push_line(b"$GPGGA,123519,4807.038,N\r\n");
        let mut reader = LineReader::new(port(&device), LineFilter::Nmea);

        assert_eq!(reader.next_line(), None);
        assert_eq!(reader.next_line(), Some("$GPGGA,123519,4807.038,N".to_string()));
    }

    #[test]
    fn test_any_filter_trims_and_skips_blank_lines() {
        let device = MockSerialPort::new();
        device.set_available(true);
        device.push_line(b"   \r\n");
        device.push_line(b" S +0012 +0003 +0150 \r\n");
        let mut reader = LineReader::new(port(&device), LineFilter::Any);

        assert_eq!(reader.next_line(), None);
        assert_eq!(reader.next_line(), Some("S +0012 +0003 +0150".to_string()));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let device = MockSerialPort::new();
        device.set_available(true);
        device.push_line(b"S +1 \xff +3\n");
        let mut reader = LineReader::new(port(&device), LineFilter::Any);

        let line = reader.next_line().unwrap();
        assert!(line.starts_with("S +1 "));
        assert!(line.ends_with(" +3"));
    }

    #[test]
    fn test_lora_round_trip() {
        let device = MockSerialPort::new();
        device.set_available(true);
        device.push_line(b"OK\r\n");
        let mut lora = LoraLink::new(port(&device));

        assert!(lora.write_line("AT+SEND=1,hello"));
        assert_eq!(lora.read_line(), Some("OK".to_string()));
        assert_eq!(device.get_written_data(), vec![b"AT+SEND=1,hello\r\n".to_vec()]);

        lora.close();
    }

    #[test]
    fn test_lora_write_fails_without_device() {
        let device = MockSerialPort::new();
        let mut lora = LoraLink::new(port(&device));
        assert!(!lora.write_line("AT"));
    }
}
