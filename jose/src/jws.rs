//! libtrust "pretty" JSON Web Signatures, as embedded in schema-1 manifests.
//!
//! The signed document is the payload JSON with a `signatures` member spliced
//! in before its closing brace. Each signature's protected header records how
//! many leading bytes of the document belong to the payload (`formatLength`)
//! and the bytes that closed the payload (`formatTail`), so the exact payload
//! can be reconstructed from the signed document.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::JoseError;
use crate::keys::{Jwk, KeyPair, PublicKey, ALGORITHM};

const SIGNATURES: &str = "signatures";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Protected<'a> {
    format_length: usize,
    format_tail: String,
    time: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedProtected {
    format_length: usize,
    format_tail: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureHeader {
    jwk: Jwk,
    alg: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureBlock {
    header: SignatureHeader,
    signature: String,
    protected: String,
}

#[derive(Debug, Deserialize)]
struct Signed {
    signatures: Option<Vec<SignatureBlock>>,
}

/// Decode base64url, with or without padding.
fn decode(data: &str) -> Result<Vec<u8>, JoseError> {
    Ok(URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))?)
}

/// The indent of the first member, when the object starts with `{\n`.
fn detect_indent(content: &[u8]) -> &[u8] {
    if content.len() > 2 && content[0] == b'{' && content[1] == b'\n' {
        if let Some(quote) = content[1..].iter().position(|&b| b == b'"') {
            if quote > 0 {
                return &content[2..quote + 1];
            }
        }
    }
    &[]
}

/// Length of the payload up to (not including) the whitespace before its
/// closing brace.
fn format_length(content: &[u8]) -> Result<usize, JoseError> {
    let close = content
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .ok_or(JoseError::Malformed("empty payload"))?;
    if content[close] != b'}' {
        return Err(JoseError::Malformed("payload is not a JSON object"));
    }

    let last = content[..close]
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .ok_or(JoseError::Malformed("payload is not a JSON object"))?;
    if content[last] == b',' {
        return Err(JoseError::Malformed("trailing comma in payload"));
    }
    Ok(last + 1)
}

fn to_indented<T: Serialize>(value: &T, indent: &[u8]) -> Result<Vec<u8>, JoseError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent);
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;

    // Every line after the first is also prefixed by the document indent.
    let mut prefixed = Vec::with_capacity(out.len() * 2);
    for byte in out {
        prefixed.push(byte);
        if byte == b'\n' {
            prefixed.extend_from_slice(indent);
        }
    }
    Ok(prefixed)
}

/// Sign a JSON object and splice the signature into it.
///
/// `time` is recorded in the protected header (RFC 3339). Signing is
/// deterministic for a given payload, key and time.
pub fn sign_pretty(payload: &[u8], key: &KeyPair, time: &str) -> Result<Vec<u8>, JoseError> {
    serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(payload)?;

    let indent = detect_indent(payload);
    let format_length = format_length(payload)?;

    let protected = Protected {
        format_length,
        format_tail: URL_SAFE_NO_PAD.encode(&payload[format_length..]),
        time,
    };
    let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&protected)?);
    let signing_input = format!("{protected}.{}", URL_SAFE_NO_PAD.encode(payload));
    let signature = URL_SAFE_NO_PAD.encode(key.sign(signing_input.as_bytes()));

    let blocks = [SignatureBlock {
        header: SignatureHeader {
            jwk: key.jwk(),
            alg: ALGORITHM.to_owned(),
        },
        signature,
        protected,
    }];

    let mut out = payload[..format_length].to_vec();
    out.push(b',');
    if indent.is_empty() {
        out.extend_from_slice(format!("\"{SIGNATURES}\":").as_bytes());
        out.extend(serde_json::to_vec(&blocks)?);
    } else {
        out.push(b'\n');
        out.extend_from_slice(indent);
        out.extend_from_slice(format!("\"{SIGNATURES}\": ").as_bytes());
        out.extend(to_indented(&blocks, indent)?);
        out.push(b'\n');
    }
    out.push(b'}');
    Ok(out)
}

fn parse(content: &[u8]) -> Result<(Vec<u8>, Vec<SignatureBlock>), JoseError> {
    let signed: Signed = serde_json::from_slice(content)?;
    let blocks = signed
        .signatures
        .filter(|blocks| !blocks.is_empty())
        .ok_or(JoseError::Malformed("missing signatures"))?;

    let mut format: Option<(usize, Vec<u8>)> = None;
    for block in &blocks {
        let protected: ParsedProtected = serde_json::from_slice(&decode(&block.protected)?)?;
        let tail = decode(&protected.format_tail)?;
        match &format {
            Some((length, existing)) if *length != protected.format_length || *existing != tail => {
                return Err(JoseError::Malformed("signatures disagree on payload format"));
            }
            Some(_) => {}
            None => format = Some((protected.format_length, tail)),
        }
    }

    let (length, tail) = format.ok_or(JoseError::Malformed("missing signatures"))?;
    if length > content.len() {
        return Err(JoseError::Malformed("format length exceeds document"));
    }

    let mut payload = content[..length].to_vec();
    payload.extend(tail);
    Ok((payload, blocks))
}

/// Reconstruct the signed payload, without checking signatures.
pub fn payload(content: &[u8]) -> Result<Vec<u8>, JoseError> {
    parse(content).map(|(payload, _)| payload)
}

/// Verify every signature of a pretty-signed document. Returns the keys which
/// signed it.
pub fn verify_pretty(content: &[u8]) -> Result<Vec<PublicKey>, JoseError> {
    let (payload, blocks) = parse(content)?;
    let encoded = URL_SAFE_NO_PAD.encode(&payload);

    let mut keys = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.header.alg != ALGORITHM {
            return Err(JoseError::UnsupportedAlgorithm(block.header.alg));
        }
        let key = PublicKey::from_jwk(&block.header.jwk)?;
        let signature = decode(&block.signature)?;
        key.verify(format!("{}.{encoded}", block.protected).as_bytes(), &signature)?;
        keys.push(key);
    }
    Ok(keys)
}
