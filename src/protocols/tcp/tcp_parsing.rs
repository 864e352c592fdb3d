use crate::protocols::{
    ipv4::{Ipv4Address, TCP_PROTOCOL_NUMBER},
    utility::Checksum,
};
use thiserror::Error as ThisError;

/// The number of 32-bit words in a TCP header without optional header parts
const BASE_HEADER_WORDS: u8 = 5;
/// The number of bytes in a TCP header without optional header parts
pub const BASE_HEADER_OCTETS: usize = BASE_HEADER_WORDS as usize * 4;
/// Byte offset of the checksum field within the header
const CHECKSUM_OFFSET: usize = 16;

/// The data for a TCP header
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct TcpHeader {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment (except when
    /// SYN is present). If SYN is present the sequence number is the initial
    /// sequence number (ISN) and the first data octet is ISN+1.
    pub seq: u32,
    /// If the ACK control bit is set this field contains the value of the next
    /// sequence number the sender of the segment is expecting to receive.
    pub ack: u32,
    /// The number of 32-bit words in the TCP header
    pub data_offset: u8,
    /// Flags that adjust the how segments are handled
    pub ctl: Control,
    /// The number of data octets beginning with the one indicated in the
    /// acknowledgment field which the sender of this segment is willing to
    /// accept.
    pub wnd: u16,
    /// The header checksum
    pub checksum: u16,
    /// The urgent pointer. Carried but never interpreted.
    pub urg: u16,
}

impl TcpHeader {
    /// Parses the fixed part of a serialized TCP header. Options, if the data
    /// offset announces any, are skipped over. The checksum is not verified
    /// here; see [`verify_checksum`].
    pub fn from_bytes(packet: &[u8]) -> Result<Self, ParseError> {
        if packet.len() < BASE_HEADER_OCTETS {
            Err(ParseError::HeaderTooShort)?
        }
        let u16_at = |i: usize| u16::from_be_bytes([packet[i], packet[i + 1]]);
        let u32_at =
            |i: usize| u32::from_be_bytes([packet[i], packet[i + 1], packet[i + 2], packet[i + 3]]);

        let data_offset = packet[12] >> 4;
        if data_offset < BASE_HEADER_WORDS || data_offset as usize * 4 > packet.len() {
            Err(ParseError::BadDataOffset(data_offset))?
        }

        Ok(TcpHeader {
            src_port: u16_at(0),
            dst_port: u16_at(2),
            seq: u32_at(4),
            ack: u32_at(8),
            data_offset,
            ctl: Control::from(packet[13] & 0b11_1111),
            wnd: u16_at(14),
            checksum: u16_at(CHECKSUM_OFFSET),
            urg: u16_at(18),
        })
    }

    /// Size of the header in bytes, options included
    pub fn bytes(&self) -> usize {
        self.data_offset as usize * 4
    }

    /// Convert the header to its native serialized format, ready to attach to a
    /// packet and send over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BASE_HEADER_OCTETS);
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
        out
    }
}

/// An error that occurred while parsing a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes to constitute a TCP header")]
    HeaderTooShort,
    #[error("The data offset {0} does not describe a header that fits the segment")]
    BadDataOffset(u8),
    #[error("The packet length could not fit into a u16")]
    PacketTooLong,
    #[error(
        "The computed checksum {actual:#06x} did not match the header checksum {expected:#06x}"
    )]
    Checksum { actual: u16, expected: u16 },
}

/// Sums the pseudo-header and the segment, leaving the checksum field out.
fn sum_without_checksum(
    segment: &[u8],
    src_address: Ipv4Address,
    dst_address: Ipv4Address,
) -> Result<Checksum, ParseError> {
    let length: u16 = segment
        .len()
        .try_into()
        .map_err(|_| ParseError::PacketTooLong)?;
    if segment.len() < BASE_HEADER_OCTETS {
        Err(ParseError::HeaderTooShort)?
    }
    let mut checksum = Checksum::new();
    checksum.add_pseudo_header(src_address, dst_address, TCP_PROTOCOL_NUMBER, length);
    checksum.add_bytes(&segment[..CHECKSUM_OFFSET]);
    checksum.add_bytes(&segment[CHECKSUM_OFFSET + 2..]);
    Ok(checksum)
}

/// Checks the checksum of a whole serialized segment against the
/// pseudo-header formed by the addresses it travelled between.
pub fn verify_checksum(
    segment: &[u8],
    src_address: Ipv4Address,
    dst_address: Ipv4Address,
) -> Result<(), ParseError> {
    let mut checksum = sum_without_checksum(segment, src_address, dst_address)?;
    let expected = u16::from_be_bytes([segment[CHECKSUM_OFFSET], segment[CHECKSUM_OFFSET + 1]]);
    let actual = checksum.as_u16();
    checksum.add_u16(expected);
    if checksum.complement() == 0 {
        Ok(())
    } else {
        Err(ParseError::Checksum { actual, expected })
    }
}

/// Recomputes and stores the checksum of a serialized segment in place.
pub fn fix_checksum(
    segment: &mut [u8],
    src_address: Ipv4Address,
    dst_address: Ipv4Address,
) -> Result<(), ParseError> {
    let checksum = sum_without_checksum(segment, src_address, dst_address)?.as_u16();
    segment[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    Ok(())
}

/// Used for building a serialized TCP header
#[derive(Debug)]
pub struct TcpHeaderBuilder(TcpHeader);

impl TcpHeaderBuilder {
    /// Initialize the TCP header with defaults and the given values
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(TcpHeader {
            src_port,
            dst_port,
            seq,
            wnd: 0,
            ack: 0,
            urg: 0,
            ctl: Control::default(),

            // Filled in by .build()
            data_offset: 0,
            checksum: 0,
        })
    }

    /// Set the window size
    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    /// Set the acknowledgement number
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl.set_ack(true);
        self
    }

    /// Set the psh bit up
    pub fn psh(mut self) -> Self {
        self.0.ctl.set_psh(true);
        self
    }

    /// Set the rst bit up
    pub fn rst(mut self) -> Self {
        self.0.ctl.set_rst(true);
        self
    }

    /// Set the syn bit up
    pub fn syn(mut self) -> Self {
        self.0.ctl.set_syn(true);
        self
    }

    /// Set the fin bit up
    pub fn fin(mut self) -> Self {
        self.0.ctl.set_fin(true);
        self
    }

    /// Fill in the data offset and the checksum for a segment carrying `text`
    /// from `src_address` to `dst_address`.
    pub fn build(
        self,
        src_address: Ipv4Address,
        dst_address: Ipv4Address,
        text: &[u8],
    ) -> Result<TcpHeader, BuildHeaderError> {
        let length: u16 = (text.len() + BASE_HEADER_OCTETS)
            .try_into()
            .map_err(|_| BuildHeaderError::OverlyLongPayload)?;

        let mut header = self.0;
        header.data_offset = BASE_HEADER_WORDS;
        header.checksum = 0;

        let mut checksum = Checksum::new();
        checksum.add_pseudo_header(src_address, dst_address, TCP_PROTOCOL_NUMBER, length);
        checksum.add_bytes(&header.serialize());
        checksum.add_bytes(text);

        header.checksum = checksum.as_u16();
        Ok(header)
    }
}

/// An error that occurred while building a TCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildHeaderError {
    #[error("The TCP payload is longer than can fit into a single packet")]
    OverlyLongPayload,
}

/// The control bits of a TCP header
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    /// Create a new Control with the given bits
    pub const fn new(urg: bool, ack: bool, psh: bool, rst: bool, syn: bool, fin: bool) -> Self {
        Self(
            fin as u8
                | (syn as u8) << 1
                | (rst as u8) << 2
                | (psh as u8) << 3
                | (ack as u8) << 4
                | (urg as u8) << 5,
        )
    }

    /// Get whether the urgent pointer field is significant
    pub const fn urg(self) -> bool {
        self.bit(5)
    }

    /// Get whether the acknowledgment field significant
    pub const fn ack(self) -> bool {
        self.bit(4)
    }

    /// Set whether the acknowledgment field significant
    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(4, state);
    }

    /// Get whether the push function is enabled
    pub const fn psh(self) -> bool {
        self.bit(3)
    }

    /// Set whether the push function is enabled
    pub fn set_psh(&mut self, state: bool) {
        self.set_bit(3, state);
    }

    /// Get whether to reset the connection
    pub const fn rst(self) -> bool {
        self.bit(2)
    }

    /// Set whether to reset the connection
    pub fn set_rst(&mut self, state: bool) {
        self.set_bit(2, state);
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(1)
    }

    /// Set whether to synchronize sequence numbers
    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(1, state);
    }

    /// Get whether there is no more data to send
    pub const fn fin(self) -> bool {
        self.bit(0)
    }

    /// Set whether there is no more data to send
    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(0, state);
    }

    /// Get the given bit
    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    /// Set the given bit
    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [
            (self.urg(), "URG"),
            (self.ack(), "ACK"),
            (self.psh(), "PSH"),
            (self.rst(), "RST"),
            (self.syn(), "SYN"),
            (self.fin(), "FIN"),
        ];
        write!(f, "Control(")?;
        let mut wrote = false;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if wrote {
                write!(f, ", ")?;
            }
            wrote = true;
            write!(f, "{}", name)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = b"Hello, world!";
    const SRC_ADDRESS: Ipv4Address = Ipv4Address::LOCALHOST;
    const DST_ADDRESS: Ipv4Address = Ipv4Address::new([10, 0, 0, 2]);
    const SRC_PORT: u16 = 0xcafe;
    const DST_PORT: u16 = 0xbabe;
    const SEQUENCE: u32 = 123456789;
    const WINDOW: u16 = 1024;
    const ACKNOWLEDGEMENT: u32 = 10;

    fn build_expected() -> (etherparse::TcpHeader, Vec<u8>) {
        let mut expected = etherparse::TcpHeader::new(SRC_PORT, DST_PORT, SEQUENCE, WINDOW);
        expected.acknowledgment_number = ACKNOWLEDGEMENT;
        expected.ack = true;
        expected.psh = true;
        expected.checksum = expected
            .calc_checksum_ipv4_raw(SRC_ADDRESS.to_bytes(), DST_ADDRESS.to_bytes(), PAYLOAD)
            .unwrap();

        let mut serial = vec![];
        expected.write(&mut serial).unwrap();
        serial.extend_from_slice(PAYLOAD);
        (expected, serial)
    }

    #[test]
    fn parses_packet() {
        let control = Control::new(false, true, true, false, false, false);

        let (expected, serial) = build_expected();
        let actual = TcpHeader::from_bytes(&serial).unwrap();

        assert_eq!(actual.src_port, SRC_PORT);
        assert_eq!(actual.dst_port, DST_PORT);
        assert_eq!(actual.seq, SEQUENCE);
        assert_eq!(actual.ack, ACKNOWLEDGEMENT);
        assert_eq!(actual.ctl, control);
        assert_eq!(actual.wnd, WINDOW);
        assert_eq!(actual.checksum, expected.checksum);
        assert_eq!(actual.urg, 0);
        assert_eq!(actual.bytes(), BASE_HEADER_OCTETS);
        assert!(!actual.ctl.syn());
        assert!(!actual.ctl.fin());
        assert!(verify_checksum(&serial, SRC_ADDRESS, DST_ADDRESS).is_ok());
    }

    #[test]
    fn builds_packet() {
        let (_, expected) = build_expected();

        let header = TcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .wnd(WINDOW)
            .psh()
            .ack(ACKNOWLEDGEMENT)
            .build(SRC_ADDRESS, DST_ADDRESS, PAYLOAD)
            .unwrap();
        let mut actual = header.serialize();
        actual.extend_from_slice(PAYLOAD);

        assert_eq!(expected, actual);
    }

    #[test]
    fn skips_options() {
        let mut segment = TcpHeaderBuilder::new(1, 2, 3)
            .syn()
            .build(SRC_ADDRESS, DST_ADDRESS, &[])
            .unwrap()
            .serialize();
        // One word of options: MSS option, kind 2, length 4
        segment[12] = 6 << 4;
        segment.extend_from_slice(&[2, 4, 0x05, 0xb4]);
        segment.extend_from_slice(b"data");

        let header = TcpHeader::from_bytes(&segment).unwrap();
        assert_eq!(header.bytes(), 24);
        assert_eq!(&segment[header.bytes()..], b"data");
    }

    #[test]
    fn rejects_bad_offsets() {
        assert_eq!(
            TcpHeader::from_bytes(&[0; 12]),
            Err(ParseError::HeaderTooShort)
        );

        let mut segment = vec![0u8; BASE_HEADER_OCTETS];
        segment[12] = 4 << 4;
        assert_eq!(
            TcpHeader::from_bytes(&segment),
            Err(ParseError::BadDataOffset(4))
        );

        segment[12] = 8 << 4;
        assert_eq!(
            TcpHeader::from_bytes(&segment),
            Err(ParseError::BadDataOffset(8))
        );
    }

    #[test]
    fn detects_corruption() {
        let (_, mut serial) = build_expected();
        serial[BASE_HEADER_OCTETS + 3] ^= 0x20;
        assert!(matches!(
            verify_checksum(&serial, SRC_ADDRESS, DST_ADDRESS),
            Err(ParseError::Checksum { .. })
        ));

        // Swapped addresses sum the same, a different address does not
        let (_, serial) = build_expected();
        assert!(verify_checksum(&serial, DST_ADDRESS, SRC_ADDRESS).is_ok());
        assert!(verify_checksum(&serial, SRC_ADDRESS, Ipv4Address::SUBNET).is_err());
    }

    #[test]
    fn fixes_checksum_in_place() {
        let (expected, mut serial) = build_expected();
        serial[16] = 0;
        serial[17] = 0;
        fix_checksum(&mut serial, SRC_ADDRESS, DST_ADDRESS).unwrap();
        assert_eq!(
            u16::from_be_bytes([serial[16], serial[17]]),
            expected.checksum
        );
        assert!(verify_checksum(&serial, SRC_ADDRESS, DST_ADDRESS).is_ok());
    }

    #[test]
    fn control_works() {
        let control = Control::new(true, false, true, false, true, false);
        assert!(control.urg());
        assert!(!control.ack());
        assert!(control.psh());
        assert!(!control.rst());
        assert!(control.syn());
        assert!(!control.fin());

        let control = {
            let mut control = Control::default();
            control.set_ack(true);
            control.set_rst(true);
            control.set_fin(true);
            control
        };
        assert!(!control.urg());
        assert!(control.ack());
        assert!(!control.psh());
        assert!(control.rst());
        assert!(!control.syn());
        assert!(control.fin());
        assert_eq!(format!("{:?}", control), "Control(ACK, RST, FIN)");
    }
}
