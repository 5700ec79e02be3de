//! Application protocol negotiation helpers.

use crate::net::error::TransportError;

/// Encode configured protocol names as ALPN identifiers.
pub fn encode<S: AsRef<str>>(protocols: &[S]) -> Vec<Vec<u8>> {
    protocols
        .iter()
        .map(|p| p.as_ref().as_bytes().to_vec())
        .collect()
}

/// First entry of `offered` that `supported` also lists.
pub fn select<'a>(offered: &'a [Vec<u8>], supported: &[Vec<u8>]) -> Option<&'a [u8]> {
    offered
        .iter()
        .find(|p| supported.contains(p))
        .map(Vec::as_slice)
}

/// Check the protocol the handshake settled on against what we offered.
///
/// An empty offer accepts anything, including no protocol at all.
pub(crate) fn verify(
    offered: &[Vec<u8>],
    negotiated: Option<&[u8]>,
) -> Result<(), TransportError> {
    if offered.is_empty() {
        return Ok(());
    }
    match negotiated {
        Some(protocol) if select(offered, &[protocol.to_vec()]).is_some() => Ok(()),
        Some(protocol) => Err(TransportError::Handshake(format!(
            "peer selected unoffered protocol {}",
            display(protocol)
        ))),
        None => Err(TransportError::Handshake(
            "no application protocol negotiated".to_string(),
        )),
    }
}

/// Printable form of a protocol identifier.
pub fn display(protocol: &[u8]) -> String {
    String::from_utf8_lossy(protocol).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_follows_offer_order() {
        let offered = encode(&["hq-interop", "h3"]);
        let supported = encode(&["h3", "hq-interop"]);
        assert_eq!(select(&offered, &supported), Some(&b"hq-interop"[..]));
    }

    #[test]
    fn select_without_overlap() {
        let offered = encode(&["h3"]);
        let supported = encode(&["hq-interop"]);
        assert_eq!(select(&offered, &supported), None);
    }

    #[test]
    fn verify_rules() {
        let offered = encode(&["h3"]);
        assert!(verify(&offered, Some(b"h3")).is_ok());
        assert!(verify(&offered, Some(b"h2")).is_err());
        assert!(verify(&offered, None).is_err());
        assert!(verify(&[], None).is_ok());
    }
}
