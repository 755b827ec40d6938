use std::ops::Range;

use crypto_hash::{Algorithm, hex_digest};

use crate::{Error, Result};

/// Compute the SHA-1 info hash of a `.torrent` file.
///
/// The hash covers the raw bencoded bytes of the top-level `info` value,
/// so instead of a full decode we scan the bencode and remember the span
/// of that value.
pub fn torrent_info_hash(buf: &[u8]) -> Result<String> {
    let span = info_span(buf)?;
    Ok(hex_digest(Algorithm::SHA1, &buf[span]))
}

fn info_span(buf: &[u8]) -> Result<Range<usize>> {
    let mut scanner = Scanner { buf, pos: 0 };
    if scanner.bump()? != b'd' {
        return Err(Error::NotADict);
    }
    while scanner.peek()? != b'e' {
        let key = scanner.read_string()?;
        let start = scanner.pos;
        scanner.skip_value()?;
        if key == b"info" {
            return Ok(start..scanner.pos);
        }
    }
    Err(Error::NoInfoDict)
}

struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Result<u8> {
        self.buf
            .get(self.pos)
            .copied()
            .ok_or(Error::TruncatedBencode(self.pos))
    }

    fn bump(&mut self) -> Result<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn read_string(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let mut len: usize = 0;
        loop {
            match self.bump()? {
                b':' => break,
                d @ b'0'..=b'9' => {
                    len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add((d - b'0') as usize))
                        .ok_or(Error::BadStringLength(start))?;
                }
                _ => return Err(Error::BadStringLength(start)),
            }
        }
        if self.pos == start + 1 {
            // ":" with no digits
            return Err(Error::BadStringLength(start));
        }
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or(Error::TruncatedBencode(self.pos))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn skip_value(&mut self) -> Result<()> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                while self.bump()? != b'e' {}
                Ok(())
            }
            b'l' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.skip_value()?;
                }
                self.pos += 1;
                Ok(())
            }
            b'd' => {
                self.pos += 1;
                while self.peek()? != b'e' {
                    self.read_string()?;
                    self.skip_value()?;
                }
                self.pos += 1;
                Ok(())
            }
            b'0'..=b'9' => self.read_string().map(|_| ()),
            byte => Err(Error::UnexpectedBencode {
                byte,
                offset: self.pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TORRENT: &[u8] =
        b"d8:announce20:http://tracker/merge4:infod6:lengthi1024e4:name8:file.mkv12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaae7:comment3:abce";

    #[test]
    fn test_info_span_covers_info_dict() {
        let span = info_span(TORRENT).unwrap();
        let info = &TORRENT[span];
        assert!(info.starts_with(b"d6:lengthi1024e"));
        assert!(info.ends_with(b"aaaae"));
    }

    #[test]
    fn test_info_hash_is_sha1_of_info_span() {
        let hash = torrent_info_hash(TORRENT).unwrap();
        assert_eq!(hash.len(), 40);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));

        let span = info_span(TORRENT).unwrap();
        assert_eq!(hash, hex_digest(Algorithm::SHA1, &TORRENT[span]));
        // Deterministic for the same bytes.
        assert_eq!(hash, torrent_info_hash(TORRENT).unwrap());
    }

    #[test]
    fn test_info_hash_ignores_outer_keys() {
        // Same info dict wrapped with different outer keys hashes the same.
        let other: &[u8] =
            b"d7:comment5:other4:infod6:lengthi1024e4:name8:file.mkv12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";
        assert_eq!(
            torrent_info_hash(TORRENT).unwrap(),
            torrent_info_hash(other).unwrap()
        );
    }

    #[test]
    fn test_not_a_dict() {
        assert!(matches!(
            torrent_info_hash(b"l4:spame"),
            Err(Error::NotADict)
        ));
    }

    #[test]
    fn test_no_info_dict() {
        assert!(matches!(
            torrent_info_hash(b"d8:announce3:urle"),
            Err(Error::NoInfoDict)
        ));
    }

    #[test]
    fn test_truncated() {
        let mut cut = TORRENT.to_vec();
        cut.truncate(40);
        assert!(matches!(
            torrent_info_hash(&cut),
            Err(Error::TruncatedBencode(_))
        ));
    }
}
