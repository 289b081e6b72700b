use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::messaging::command::Command;
use crate::messaging::config::ProtocolConfig;
use crate::messaging::ticket::Ticket;
use crate::util::buf::WireBuf;

/// The prefix of every datagram: the command token, followed by the ticket, which is
///  [Ticket::NONE] for one-way requests and push events.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DatagramHeader {
    pub command: Command,
    pub ticket: Ticket,
}

impl DatagramHeader {
    pub fn new(command: Command, ticket: Ticket) -> DatagramHeader {
        DatagramHeader {
            command,
            ticket,
        }
    }

    pub fn one_way(command: Command) -> DatagramHeader {
        Self::new(command, Ticket::NONE)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let token = self.command.token();
        buf.put_u16(token.len() as u16);
        buf.put_slice(token.as_bytes());
        buf.put_i64(self.ticket.0);
    }

    /// An unrecognized token is not an error at this level, it decodes to [Command::Unknown].
    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<DatagramHeader> {
        let token = buf.checked_string()?;
        let ticket = Ticket(buf.checked_i64()?);

        Ok(DatagramHeader {
            command: Command::from_token(&token),
            ticket,
        })
    }
}

/// Writes header and body into a fresh buffer, enforcing the configured hard maximum datagram size.
pub fn encode_datagram(
    config: &ProtocolConfig,
    header: DatagramHeader,
    body: impl FnOnce(&mut BytesMut) -> anyhow::Result<()>,
) -> anyhow::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(config.initial_datagram_size);
    header.ser(&mut buf);
    body(&mut buf)?;

    if buf.len() > config.max_datagram_size {
        bail!("{:?} datagram of {} bytes exceeds the maximum of {} bytes", header.command, buf.len(), config.max_datagram_size);
    }
    Ok(buf.freeze())
}


#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use rstest::rstest;

    #[rstest]
    #[case::one_way(DatagramHeader::one_way(Command::SetVelocity), vec![0, 2, b'S', b'V', 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff])]
    #[case::ticketed(DatagramHeader::new(Command::GetWaypointStatus, Ticket(0x0102)), vec![0, 3, b'G', b'W', b'S', 0, 0, 0, 0, 0, 0, 1, 2])]
    fn test_ser(#[case] header: DatagramHeader, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        header.ser(&mut buf);
        assert_eq!(&buf[..], &expected[..]);

        let mut b: &[u8] = &buf;
        assert_eq!(DatagramHeader::try_deser(&mut b).unwrap(), header);
    }

    #[test]
    fn test_unknown_token() {
        let mut buf = BytesMut::new();
        buf.put_u16(3);
        buf.put_slice(b"ZZZ");
        buf.put_i64(5);

        let mut b: &[u8] = &buf;
        assert_eq!(DatagramHeader::try_deser(&mut b).unwrap(), DatagramHeader::new(Command::Unknown, Ticket(5)));
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::truncated_token(vec![0, 2, b'G'])]
    #[case::missing_ticket(vec![0, 2, b'G', b'P', 0, 0, 0])]
    fn test_truncated(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(DatagramHeader::try_deser(&mut b).is_err());
    }

    #[rstest]
    #[case::fits(4096 - 12, true)]
    #[case::too_big(4096 - 11, false)]
    fn test_encode_datagram_size_limit(#[case] body_len: usize, #[case] expected_ok: bool) {
        let config = ProtocolConfig::new();
        let result = encode_datagram(&config, DatagramHeader::one_way(Command::SetPose), |buf| {
            buf.put_bytes(0, body_len);
            Ok(())
        });
        assert_eq!(result.is_ok(), expected_ok);
    }
}
