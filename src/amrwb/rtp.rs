//! RTP header stripping.
//!
//! Some media paths forward whole RTP packets instead of bare AMR-WB payloads.
//! The header is recognized conservatively: version 2 and a dynamic payload
//! type (96-127), which AMR-WB always uses. A bandwidth-efficient payload
//! with CMR 8-11 still passes both checks, so callers must fall back to the
//! untouched bytes when the stripped remainder does not parse.

const RTP_FIXED_HEADER: usize = 12;
const RTP_VERSION: u8 = 2;

/// Result of [`strip_rtp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stripped<'a> {
    pub payload: &'a [u8],
    pub stripped: bool,
}

/// Header fields needed to locate the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
}

impl RtpHeader {
    /// Parse the fixed header, or `None` if this does not look like AMR-WB RTP.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() <= RTP_FIXED_HEADER {
            return None;
        }
        if data[0] >> 6 != RTP_VERSION {
            return None;
        }
        let payload_type = data[1] & 0x7F;
        if !(96..=127).contains(&payload_type) {
            return None;
        }

        Some(Self {
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            csrc_count: data[0] & 0x0F,
            payload_type,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }

    /// Bytes occupied by the fixed header, CSRC list and extension block.
    pub fn header_len(&self, data: &[u8]) -> Option<usize> {
        let mut size = RTP_FIXED_HEADER + self.csrc_count as usize * 4;
        if self.extension {
            if data.len() < size + 4 {
                return None;
            }
            let words = u16::from_be_bytes([data[size + 2], data[size + 3]]) as usize;
            size += 4 + words * 4;
        }
        Some(size)
    }
}

/// Remove RTP framing when present; otherwise return the input untouched.
pub fn strip_rtp(data: &[u8]) -> Stripped<'_> {
    let untouched = Stripped {
        payload: data,
        stripped: false,
    };

    let Some(header) = RtpHeader::parse(data) else {
        return untouched;
    };
    let Some(start) = header.header_len(data) else {
        return untouched;
    };
    if start >= data.len() {
        return untouched;
    }

    let mut end = data.len();
    if header.padding {
        let pad = data[data.len() - 1] as usize;
        // Inconsistent padding counts are ignored rather than trusted.
        if pad > 0 && pad <= end - start {
            end -= pad;
        }
    }
    if end <= start {
        return untouched;
    }

    Stripped {
        payload: &data[start..end],
        stripped: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(pt: u8) -> Vec<u8> {
        vec![0x80, pt, 0x00, 0x01, 0, 0, 0x01, 0x40, 0xDE, 0xAD, 0xBE, 0xEF]
    }

    #[test]
    fn test_strips_plain_header() {
        let mut packet = header(111);
        packet.extend_from_slice(&[0xF0, 0x14, 0xAA]);
        let out = strip_rtp(&packet);
        assert!(out.stripped);
        assert_eq!(out.payload, &[0xF0, 0x14, 0xAA]);
    }

    #[test]
    fn test_strips_extension_and_padding() {
        let mut packet = header(100);
        packet[0] |= 0x10 | 0x20;
        // Extension: profile 0xBEDE, one 32-bit word.
        packet.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 1, 2, 3, 4]);
        packet.extend_from_slice(&[0x11, 0x22, 0x33]);
        // Two padding bytes, the last one holding the count.
        packet.extend_from_slice(&[0x00, 0x02]);

        let out = strip_rtp(&packet);
        assert!(out.stripped);
        assert_eq!(out.payload, &[0x11, 0x22, 0x33]);
    }

    #[test]
    fn test_skips_csrc_list() {
        let mut packet = header(97);
        packet[0] |= 0x01;
        packet.extend_from_slice(&[9, 9, 9, 9]);
        packet.extend_from_slice(&[0x55]);
        let out = strip_rtp(&packet);
        assert_eq!(out.payload, &[0x55]);
    }

    #[test]
    fn test_static_payload_type_is_not_rtp() {
        // Looks like version 2 but PT 0 (PCMU) never carries AMR-WB.
        let mut packet = header(0);
        packet.extend_from_slice(&[1, 2, 3]);
        let out = strip_rtp(&packet);
        assert!(!out.stripped);
        assert_eq!(out.payload.len(), packet.len());
    }

    #[test]
    fn test_bare_payloads_untouched() {
        let payload = [0xF1, 0x6E, 0x00, 0x00];
        let out = strip_rtp(&payload);
        assert!(!out.stripped);
        assert_eq!(out.payload, &payload);

        // Header-only packets have nothing to strip down to.
        let header_only = header(111);
        let out = strip_rtp(&header_only);
        assert!(!out.stripped);
    }
}
