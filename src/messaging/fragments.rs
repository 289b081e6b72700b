use std::net::SocketAddr;

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::messaging::config::ProtocolConfig;
use crate::util::buf::{WireBuf, WireBufMut};

/// One piece of an image. All pieces of an image share the sequence number and the total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFragment {
    pub sequence: i32,
    pub total: i32,
    pub index: i32,
    pub data: Bytes,
}

impl ImageFragment {
    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        buf.put_i32(self.sequence);
        buf.put_i32(self.total);
        buf.put_i32(self.index);
        buf.put_block(&self.data)
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ImageFragment> {
        let sequence = buf.checked_i32()?;
        let total = buf.checked_i32()?;
        let index = buf.checked_i32()?;
        let data = buf.checked_block()?;

        if total <= 0 {
            bail!("image fragment with total of {}", total);
        }
        if index < 0 || index >= total {
            bail!("image fragment index {} out of range for total {}", index, total);
        }

        Ok(ImageFragment {
            sequence,
            total,
            index,
            data,
        })
    }
}

/// Splits an image into pieces of at most `max_payload` bytes. An empty image becomes a single
///  empty piece so that receivers still see it.
pub fn fragment_image(sequence: i32, image: &Bytes, max_payload: usize, max_fragments: usize) -> anyhow::Result<Vec<ImageFragment>> {
    let total = image.len().div_ceil(max_payload).max(1);
    if total > max_fragments {
        bail!("image of {} bytes needs {} fragments, the maximum is {}", image.len(), total, max_fragments);
    }

    let result = (0..total)
        .map(|index| {
            let start = index * max_payload;
            let end = (start + max_payload).min(image.len());
            ImageFragment {
                sequence,
                total: total as i32,
                index: index as i32,
                data: image.slice(start..end),
            }
        })
        .collect();
    Ok(result)
}

struct ReassemblySlot {
    source: SocketAddr,
    sequence: i32,
    pieces: Vec<Option<Bytes>>,
    num_filled: usize,
}

impl ReassemblySlot {
    fn new(source: SocketAddr, fragment: &ImageFragment) -> ReassemblySlot {
        ReassemblySlot {
            source,
            sequence: fragment.sequence,
            pieces: vec![None; fragment.total as usize],
            num_filled: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.num_filled == self.pieces.len()
    }

    fn assemble(&self) -> Bytes {
        let len = self.pieces.iter()
            .map(|p| p.as_ref().map(|p| p.len()).unwrap_or(0))
            .sum();

        let mut result = BytesMut::with_capacity(len);
        for piece in self.pieces.iter().flatten() {
            result.extend_from_slice(piece);
        }
        result.freeze()
    }
}

/// Rebuilds images from fragments that may arrive in any order, duplicated, or not at all.
///
/// There is a single slot: a fragment of a new image (or from a different source) discards
///  whatever was buffered before. Fragments of an image that was recently superseded are dropped
///  instead, so late stragglers do not destroy the image currently being assembled.
pub struct ImageReassembler {
    max_fragments: usize,
    stale_window: i32,
    slot: Option<ReassemblySlot>,
}

impl ImageReassembler {
    pub fn new(config: &ProtocolConfig) -> ImageReassembler {
        ImageReassembler {
            max_fragments: config.max_image_fragments,
            stale_window: config.stale_sequence_window as i32,
            slot: None,
        }
    }

    /// Returns the complete image when this fragment was the last missing piece, exactly once
    ///  per image. Fragments with inconsistent geometry are rejected with an error.
    pub fn on_fragment(&mut self, source: SocketAddr, fragment: ImageFragment) -> anyhow::Result<Option<Bytes>> {
        if fragment.total <= 0 || fragment.total as usize > self.max_fragments {
            bail!("image fragment total of {} is outside 1..={}", fragment.total, self.max_fragments);
        }
        if fragment.index < 0 || fragment.index >= fragment.total {
            bail!("image fragment index {} out of range for total {}", fragment.index, fragment.total);
        }

        let adopt = match &self.slot {
            Some(slot) if slot.source == source && slot.sequence == fragment.sequence => {
                if slot.pieces.len() != fragment.total as usize {
                    bail!("image {} has {} pieces, fragment claims {}", fragment.sequence, slot.pieces.len(), fragment.total);
                }
                false
            }
            Some(slot) if slot.source == source && Self::is_stale(self.stale_window, slot.sequence, fragment.sequence) => {
                debug!("dropping fragment of superseded image {} (now at {})", fragment.sequence, slot.sequence);
                return Ok(None);
            }
            _ => true,
        };

        let slot = match (adopt, &mut self.slot) {
            (false, Some(slot)) => slot,
            (_, slot) => {
                trace!("starting reassembly of image {} from {:?} with {} pieces", fragment.sequence, source, fragment.total);
                slot.insert(ReassemblySlot::new(source, &fragment))
            }
        };

        let piece = &mut slot.pieces[fragment.index as usize];
        if piece.is_some() {
            trace!("duplicate fragment {} of image {} - ignoring", fragment.index, fragment.sequence);
            return Ok(None);
        }
        *piece = Some(fragment.data);
        slot.num_filled += 1;

        if slot.is_complete() {
            debug!("image {} complete", slot.sequence);
            return Ok(Some(slot.assemble()));
        }
        Ok(None)
    }

    fn is_stale(window: i32, current: i32, candidate: i32) -> bool {
        let behind = current.wrapping_sub(candidate);
        behind > 0 && behind <= window
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use rstest::rstest;

    fn source() -> SocketAddr {
        SocketAddr::from_str("10.0.0.1:11411").unwrap()
    }

    fn image(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into()
    }

    fn reassembler() -> ImageReassembler {
        ImageReassembler::new(&ProtocolConfig::new())
    }

    #[rstest]
    #[case::empty(0, 512, vec![0])]
    #[case::single_byte(1, 512, vec![1])]
    #[case::exact(512, 512, vec![512])]
    #[case::one_more(513, 512, vec![512, 1])]
    #[case::ten_kb(10240, 512, vec![512; 20])]
    #[case::uneven(1000, 300, vec![300, 300, 300, 100])]
    fn test_fragment_sizes(#[case] len: usize, #[case] max_payload: usize, #[case] expected: Vec<usize>) {
        let fragments = fragment_image(9, &image(len), max_payload, 1024).unwrap();
        assert_eq!(fragments.iter().map(|f| f.data.len()).collect::<Vec<_>>(), expected);

        for (i, f) in fragments.iter().enumerate() {
            assert_eq!(f.sequence, 9);
            assert_eq!(f.total as usize, expected.len());
            assert_eq!(f.index as usize, i);
        }
    }

    #[test]
    fn test_fragment_limit() {
        assert!(fragment_image(1, &image(2049), 512, 4).is_err());
        assert_eq!(fragment_image(1, &image(2048), 512, 4).unwrap().len(), 4);
    }

    #[rstest]
    #[case::in_order(vec![0, 1, 2, 3, 4])]
    #[case::reversed(vec![4, 3, 2, 1, 0])]
    #[case::interleaved(vec![1, 3, 0, 4, 2])]
    #[case::duplicates(vec![2, 2, 0, 1, 0, 3, 1, 4])]
    #[case::duplicates_after_completion(vec![0, 1, 2, 3, 4, 4, 0, 2])]
    fn test_reassembly_permutations(#[case] order: Vec<usize>) {
        let original = image(2100);
        let fragments = fragment_image(3, &original, 512, 1024).unwrap();
        assert_eq!(fragments.len(), 5);

        let mut reassembler = reassembler();
        let mut delivered = Vec::new();
        for i in order {
            if let Some(image) = reassembler.on_fragment(source(), fragments[i].clone()).unwrap() {
                delivered.push(image);
            }
        }
        assert_eq!(delivered, vec![original]);
    }

    #[test]
    fn test_new_sequence_discards_partial_image() {
        let first = fragment_image(1, &image(1024), 512, 1024).unwrap();
        let second = fragment_image(2, &image(1500), 512, 1024).unwrap();

        let mut reassembler = reassembler();
        assert_eq!(reassembler.on_fragment(source(), first[0].clone()).unwrap(), None);
        assert_eq!(reassembler.on_fragment(source(), second[2].clone()).unwrap(), None);
        // piece 1 of the abandoned image does not complete anything
        assert_eq!(reassembler.on_fragment(source(), first[1].clone()).unwrap(), None);
        assert_eq!(reassembler.on_fragment(source(), second[0].clone()).unwrap(), None);
        assert_eq!(reassembler.on_fragment(source(), second[1].clone()).unwrap(), Some(image(1500)));
    }

    #[rstest]
    #[case::one_behind(10, 9, true)]
    #[case::window_edge(10, -6, true)]
    #[case::beyond_window(10, -7, false)]
    #[case::ahead(10, 11, false)]
    #[case::wrapped(i32::MIN, i32::MAX, true)]
    fn test_is_stale(#[case] current: i32, #[case] candidate: i32, #[case] expected: bool) {
        assert_eq!(ImageReassembler::is_stale(16, current, candidate), expected);
    }

    #[test]
    fn test_restarted_sender_is_adopted() {
        let mut reassembler = reassembler();
        let old = fragment_image(5000, &image(10), 512, 1024).unwrap();
        let restarted = fragment_image(3, &image(20), 512, 1024).unwrap();

        assert_eq!(reassembler.on_fragment(source(), old[0].clone()).unwrap(), Some(image(10)));
        assert_eq!(reassembler.on_fragment(source(), restarted[0].clone()).unwrap(), Some(image(20)));
    }

    #[rstest]
    #[case::zero_total(ImageFragment { sequence: 1, total: 0, index: 0, data: Bytes::new() })]
    #[case::negative_index(ImageFragment { sequence: 1, total: 2, index: -1, data: Bytes::new() })]
    #[case::index_too_big(ImageFragment { sequence: 1, total: 2, index: 2, data: Bytes::new() })]
    #[case::too_many_pieces(ImageFragment { sequence: 1, total: 1025, index: 0, data: Bytes::new() })]
    fn test_invalid_fragment(#[case] fragment: ImageFragment) {
        assert!(reassembler().on_fragment(source(), fragment).is_err());
    }

    #[test]
    fn test_inconsistent_total() {
        let mut reassembler = reassembler();
        let fragment = ImageFragment { sequence: 1, total: 3, index: 0, data: Bytes::from_static(b"a") };
        assert_eq!(reassembler.on_fragment(source(), fragment).unwrap(), None);

        let conflicting = ImageFragment { sequence: 1, total: 2, index: 1, data: Bytes::from_static(b"b") };
        assert!(reassembler.on_fragment(source(), conflicting).is_err());
    }

    #[rstest]
    #[case::regular(ImageFragment { sequence: -3, total: 4, index: 3, data: Bytes::from_static(b"pixels") }, true)]
    #[case::bad_index(ImageFragment { sequence: 1, total: 4, index: 4, data: Bytes::from_static(b"pixels") }, false)]
    fn test_ser_deser(#[case] fragment: ImageFragment, #[case] valid: bool) {
        let mut buf = BytesMut::new();
        fragment.ser(&mut buf).unwrap();

        let mut b: &[u8] = &buf;
        let result = ImageFragment::try_deser(&mut b);
        if valid {
            assert_eq!(result.unwrap(), fragment);
        }
        else {
            assert!(result.is_err());
        }
    }
}
