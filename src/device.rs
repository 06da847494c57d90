use crate::error::PlcError;
use std::fmt;
use std::str::FromStr;

/// Device classes addressable through the MC protocol, identified by their
/// short alphabetic tag (D, M, X, ...). Each class carries a fixed one-byte
/// wire code and is either bit or word oriented.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DeviceType {
    /// Data register
    D,
    /// Link register
    W,
    /// Internal relay
    M,
    /// Input relay
    X,
    /// Output relay
    Y,
    /// Link relay
    B,
    /// Special relay
    SM,
    /// Special register
    SD,
    /// Timer (contact)
    TS,
    /// Timer (coil)
    TC,
    /// Timer (current value)
    TN,
    /// Accumulated timer (contact)
    SS,
    /// Accumulated timer (coil)
    SC,
    /// Accumulated timer (current value)
    SN,
    /// Counter (contact)
    CS,
    /// Counter (coil)
    CC,
    /// Counter (current value)
    CN,
    /// File register
    R,
    /// File register
    ZR,
}

impl DeviceType {
    /// Every supported device class, in wire-table order.
    pub const ALL: [DeviceType; 19] = [
        DeviceType::D,
        DeviceType::W,
        DeviceType::M,
        DeviceType::X,
        DeviceType::Y,
        DeviceType::B,
        DeviceType::SM,
        DeviceType::SD,
        DeviceType::TS,
        DeviceType::TC,
        DeviceType::TN,
        DeviceType::SS,
        DeviceType::SC,
        DeviceType::SN,
        DeviceType::CS,
        DeviceType::CC,
        DeviceType::CN,
        DeviceType::R,
        DeviceType::ZR,
    ];

    /// The on-wire device code for this class.
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            DeviceType::D => 0xA8,
            DeviceType::W => 0xB4,
            DeviceType::M => 0x90,
            DeviceType::X => 0x9C,
            DeviceType::Y => 0x9D,
            DeviceType::B => 0xA0,
            DeviceType::SM => 0x91,
            DeviceType::SD => 0xA9,
            DeviceType::TS => 0xC1,
            DeviceType::TC => 0xC0,
            DeviceType::TN => 0xC2,
            DeviceType::SS => 0xC7,
            DeviceType::SC => 0xC6,
            DeviceType::SN => 0xC8,
            DeviceType::CS => 0xC4,
            DeviceType::CC => 0xC3,
            DeviceType::CN => 0xC5,
            DeviceType::R => 0xAF,
            DeviceType::ZR => 0xB0,
        }
    }

    /// Returns true for bit-oriented classes, false for word-oriented ones.
    #[inline]
    pub fn is_bit(self) -> bool {
        match self {
            DeviceType::X
            | DeviceType::Y
            | DeviceType::M
            | DeviceType::B
            | DeviceType::SM
            | DeviceType::TS
            | DeviceType::TC
            | DeviceType::SS
            | DeviceType::SC
            | DeviceType::CS
            | DeviceType::CC => true,
            _ => false,
        }
    }

    /// Returns true for word-oriented classes.
    #[inline]
    pub fn is_word(self) -> bool {
        !self.is_bit()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tag = match self {
            DeviceType::D => "D",
            DeviceType::W => "W",
            DeviceType::M => "M",
            DeviceType::X => "X",
            DeviceType::Y => "Y",
            DeviceType::B => "B",
            DeviceType::SM => "SM",
            DeviceType::SD => "SD",
            DeviceType::TS => "TS",
            DeviceType::TC => "TC",
            DeviceType::TN => "TN",
            DeviceType::SS => "SS",
            DeviceType::SC => "SC",
            DeviceType::SN => "SN",
            DeviceType::CS => "CS",
            DeviceType::CC => "CC",
            DeviceType::CN => "CN",
            DeviceType::R => "R",
            DeviceType::ZR => "ZR",
        };
        f.write_str(tag)
    }
}

impl FromStr for DeviceType {
    type Err = PlcError;

    fn from_str(tag: &str) -> Result<DeviceType, PlcError> {
        match tag {
            "D" => Ok(DeviceType::D),
            "W" => Ok(DeviceType::W),
            "M" => Ok(DeviceType::M),
            "X" => Ok(DeviceType::X),
            "Y" => Ok(DeviceType::Y),
            "B" => Ok(DeviceType::B),
            "SM" => Ok(DeviceType::SM),
            "SD" => Ok(DeviceType::SD),
            "TS" => Ok(DeviceType::TS),
            "TC" => Ok(DeviceType::TC),
            "TN" => Ok(DeviceType::TN),
            "SS" => Ok(DeviceType::SS),
            "SC" => Ok(DeviceType::SC),
            "SN" => Ok(DeviceType::SN),
            "CS" => Ok(DeviceType::CS),
            "CC" => Ok(DeviceType::CC),
            "CN" => Ok(DeviceType::CN),
            "R" => Ok(DeviceType::R),
            "ZR" => Ok(DeviceType::ZR),
            _ => Err(PlcError::Device(format!("Unsupported device type: {}", tag))),
        }
    }
}

/// A value transferred to or from a device point. Bit classes carry booleans,
/// word classes carry unsigned 16-bit integers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Value {
    Bit(bool),
    Word(u16),
}

impl Value {
    /// Returns true when the value belongs to a bit class.
    #[inline]
    pub fn is_bit(self) -> bool {
        match self {
            Value::Bit(_) => true,
            Value::Word(_) => false,
        }
    }

    /// The boolean payload, if this is a bit value.
    #[inline]
    pub fn as_bit(self) -> Option<bool> {
        match self {
            Value::Bit(bit) => Some(bit),
            Value::Word(_) => None,
        }
    }

    /// The word payload, if this is a word value.
    #[inline]
    pub fn as_word(self) -> Option<u16> {
        match self {
            Value::Word(word) => Some(word),
            Value::Bit(_) => None,
        }
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(bit: bool) -> Value {
        Value::Bit(bit)
    }
}

impl From<u16> for Value {
    #[inline]
    fn from(word: u16) -> Value {
        Value::Word(word)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bit(bit) => write!(f, "{}", if *bit { 1 } else { 0 }),
            Value::Word(word) => write!(f, "{}", word),
        }
    }
}
