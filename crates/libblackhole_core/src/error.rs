#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("torrent is not a bencoded dictionary")]
    NotADict,
    #[error("torrent has no info dictionary")]
    NoInfoDict,
    #[error("truncated bencode at offset {0}")]
    TruncatedBencode(usize),
    #[error("unexpected byte {byte:#04x} in bencode at offset {offset}")]
    UnexpectedBencode { byte: u8, offset: usize },
    #[error("bad bencode string length at offset {0}")]
    BadStringLength(usize),

    #[error("magnet link must be a valid URL: {0}")]
    MagnetUrl(#[source] url::ParseError),
    #[error("expected scheme magnet")]
    MagnetScheme,
    #[error("magnet link has no xt=urn:btih: info hash")]
    MagnetNoInfohash,
}
