use crate::{Error, Result};

/// A parsed magnet link.
///
/// Only the BTIH form of `xt` is understood. The info hash is kept as the
/// raw string from the link: debrid services accept both the 40-char hex
/// and the base32 form, and the caller decides what to do with
/// non-SHA1-sized hashes.
pub struct Magnet {
    btih: String,
    pub name: Option<String>,
}

impl Magnet {
    pub fn parse(url: &str) -> Result<Magnet> {
        let url = url::Url::parse(url).map_err(Error::MagnetUrl)?;
        if url.scheme() != "magnet" {
            return Err(Error::MagnetScheme);
        }
        let mut btih: Option<String> = None;
        let mut name: Option<String> = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(ih) = value.as_ref().strip_prefix("urn:btih:") {
                        btih.replace(ih.to_owned());
                    }
                }
                "dn" => {
                    name.replace(value.into_owned());
                }
                _ => {}
            }
        }
        match btih {
            Some(btih) => Ok(Magnet { btih, name }),
            None => Err(Error::MagnetNoInfohash),
        }
    }

    pub fn info_hash(&self) -> &str {
        &self.btih
    }
}

#[cfg(test)]
mod tests {
    use super::Magnet;

    #[test]
    fn test_parse_magnet() {
        let magnet = "magnet:?xt=urn:btih:a621779b5e3d486e127c3efbca9b6f8d135f52e5&dn=The.Movie.2020.1080p&tr=udp://opentor.org:2710";
        let m = Magnet::parse(magnet).unwrap();
        assert_eq!(m.info_hash(), "a621779b5e3d486e127c3efbca9b6f8d135f52e5");
        assert_eq!(m.name.as_deref(), Some("The.Movie.2020.1080p"));
    }

    #[test]
    fn test_parse_magnet_keeps_non_sha1_hash() {
        // Base32 BTIHs are shorter than 40 chars and must survive as-is.
        let m = Magnet::parse("magnet:?xt=urn:btih:UKRGPQFQ64JTSWLYDSGEZCUBAHFJ3LBN").unwrap();
        assert_eq!(m.info_hash(), "UKRGPQFQ64JTSWLYDSGEZCUBAHFJ3LBN");
    }

    #[test]
    fn test_parse_magnet_rejects_non_magnet() {
        assert!(Magnet::parse("https://example.com/?xt=urn:btih:abc").is_err());
        assert!(Magnet::parse("magnet:?dn=no-hash-here").is_err());
    }
}
