// ── Codec: bech32 encodings for npub / nsec / ncryptsec ───────────────────
//
// No pack repo depends on the `bech32` crate directly; it is the standard
// ecosystem crate for this exact problem (NIP-19 encodings) and is added
// as an enrichment dependency — see DESIGN.md.

use crate::atoms::error::{SignetError, SignetResult};
use bech32::{Bech32, Hrp};

fn encode(hrp: &str, data: &[u8]) -> SignetResult<String> {
    let hrp = Hrp::parse(hrp).map_err(|e| SignetError::InvalidEncoding(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| SignetError::InvalidEncoding(e.to_string()))
}

fn decode(expected_hrp: &str, s: &str) -> SignetResult<Vec<u8>> {
    let (hrp, data) = bech32::decode(s).map_err(|e| SignetError::InvalidEncoding(e.to_string()))?;
    if hrp.as_str() != expected_hrp {
        return Err(SignetError::InvalidEncoding(format!(
            "expected hrp '{expected_hrp}', got '{}'",
            hrp.as_str()
        )));
    }
    Ok(data)
}

pub fn encode_npub(pubkey_bytes: &[u8; 32]) -> SignetResult<String> {
    encode("npub", pubkey_bytes)
}

pub fn decode_npub(npub: &str) -> SignetResult<[u8; 32]> {
    let data = decode("npub", npub)?;
    to_array(data)
}

pub fn encode_nsec(secret_bytes: &[u8; 32]) -> SignetResult<String> {
    encode("nsec", secret_bytes)
}

pub fn decode_nsec(nsec: &str) -> SignetResult<[u8; 32]> {
    let data = decode("nsec", nsec)?;
    to_array(data)
}

/// `ncryptsec` carries the raw NIP-49 envelope bytes, not a fixed-size key.
pub fn encode_ncryptsec(envelope: &[u8]) -> SignetResult<String> {
    encode("ncryptsec", envelope)
}

pub fn decode_ncryptsec(ncryptsec: &str) -> SignetResult<Vec<u8>> {
    decode("ncryptsec", ncryptsec)
}

fn to_array(data: Vec<u8>) -> SignetResult<[u8; 32]> {
    if data.len() != 32 {
        return Err(SignetError::InvalidEncoding(format!("expected 32 bytes, got {}", data.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npub_roundtrip() {
        let bytes = [42u8; 32];
        let npub = encode_npub(&bytes).unwrap();
        assert!(npub.starts_with("npub1"));
        assert_eq!(decode_npub(&npub).unwrap(), bytes);
    }

    #[test]
    fn nsec_roundtrip() {
        let bytes = [7u8; 32];
        let nsec = encode_nsec(&bytes).unwrap();
        assert!(nsec.starts_with("nsec1"));
        assert_eq!(decode_nsec(&nsec).unwrap(), bytes);
    }

    #[test]
    fn ncryptsec_roundtrip() {
        let envelope = vec![2u8, 15, 1, 2, 3, 4, 5];
        let encoded = encode_ncryptsec(&envelope).unwrap();
        assert!(encoded.starts_with("ncryptsec1"));
        assert_eq!(decode_ncryptsec(&encoded).unwrap(), envelope);
    }

    #[test]
    fn wrong_hrp_rejected() {
        let npub = encode_npub(&[1u8; 32]).unwrap();
        assert!(decode_nsec(&npub).is_err());
    }
}
