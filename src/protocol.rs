
/// Acknowledgement line sent by the programmer after each command
pub const ACK: &str = "ACK";

/// Default serial baud rate used by the programmer firmware
pub const DEFAULT_BAUD: usize = 57600;

/// Length of an encoded command (opcode + payload)
pub const COMMAND_LEN: usize = 4;

/// Maximum length of a reply line, including terminators
pub const MAX_LINE: usize = 64;

/// Largest capacity addressable with a 16-bit address
pub const MAX_CAPACITY: usize = 0x1_0000;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Opcode {
    /// Read back the full EEPROM contents
    Dump = 0x01,

    /// Fill every EEPROM cell with a single value
    Erase = 0x02,

    /// Write one byte at an address
    WriteByte = 0x03,

    /// Read one byte from an address
    ReadByte = 0x04,

    /// Write a file image starting at address zero
    WriteFile = 0x05,
}

/// A programmer command with its operands
#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Dump,
    Erase { fill: u8 },
    WriteByte { address: u16, value: u8 },
    ReadByte { address: u16 },
    WriteFile { len: u16 },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Dump => Opcode::Dump,
            Command::Erase { .. } => Opcode::Erase,
            Command::WriteByte { .. } => Opcode::WriteByte,
            Command::ReadByte { .. } => Opcode::ReadByte,
            Command::WriteFile { .. } => Opcode::WriteFile,
        }
    }

    /// Encode the command into its wire representation.
    ///
    /// Multi-byte operands are little-endian, unused payload bytes are zero.
    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        let mut buff = [self.opcode() as u8, 0, 0, 0];

        match *self {
            Command::Dump => (),
            Command::Erase { fill } => buff[1] = fill,
            Command::WriteByte { address, value } => {
                buff[1..3].copy_from_slice(&address.to_le_bytes());
                buff[3] = value;
            }
            Command::ReadByte { address } => {
                buff[1..3].copy_from_slice(&address.to_le_bytes());
            }
            Command::WriteFile { len } => {
                buff[1..3].copy_from_slice(&len.to_le_bytes());
            }
        }

        buff
    }

    /// Number of data bytes the device sends between the two ACKs
    pub fn reply_len(&self, capacity: usize) -> usize {
        match self {
            Command::Dump => capacity,
            Command::ReadByte { .. } => 1,
            _ => 0,
        }
    }
}
