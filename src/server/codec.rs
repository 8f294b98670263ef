use crate::error::{Error, Result};

/// One wire packet: a tag byte and a payload. Data packets carry SQL
/// one way and result text the other; error packets carry the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Data(Vec<u8>),
    Err(String),
}

const TAG_DATA: u8 = 0x00;
const TAG_ERR: u8 = 0x01;

impl Packet {
    /// Serialise for transport: tag + payload, uppercase hex, one
    /// packet per line.
    pub fn to_line(&self) -> String {
        let mut bytes = Vec::new();
        match self {
            Packet::Data(payload) => {
                bytes.push(TAG_DATA);
                bytes.extend_from_slice(payload);
            }
            Packet::Err(message) => {
                bytes.push(TAG_ERR);
                bytes.extend_from_slice(message.as_bytes());
            }
        }
        let mut line = hex::encode_upper(bytes);
        line.push('\n');
        line
    }

    /// Decode one transport line. Bad hex or an unknown tag poisons
    /// the connection.
    pub fn from_line(line: &str) -> Result<Packet> {
        let bytes = hex::decode(line.trim_end()).map_err(|_| Error::InvalidPkgData)?;
        match bytes.split_first() {
            Some((&TAG_DATA, payload)) => Ok(Packet::Data(payload.to_vec())),
            Some((&TAG_ERR, payload)) => Ok(Packet::Err(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            _ => Err(Error::InvalidPkgData),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let packet = Packet::Data(b"select * from t".to_vec());
        let line = packet.to_line();
        assert!(line.ends_with('\n'));
        assert!(line.chars().all(|c| c.is_ascii_hexdigit() || c == '\n'));
        assert_eq!(Packet::from_line(&line).unwrap(), packet);

        let err = Packet::Err("deadlock".into());
        assert_eq!(Packet::from_line(&err.to_line()).unwrap(), err);
    }

    #[test]
    fn test_bad_input_rejected() {
        assert!(Packet::from_line("zz").is_err());
        assert!(Packet::from_line("").is_err());
        // unknown tag 0x02
        assert!(Packet::from_line("0241").is_err());
    }
}
