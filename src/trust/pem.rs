//! Certificate payload normalization
//!
//! AIA endpoints serve issuer certificates in whatever encoding the CA
//! tooling produced: PEM, bare DER, or a PKCS#7/CMS "certs-only" envelope
//! (`.p7c`). Everything funnels through [`ensure_pem`], which normalizes any
//! of those to PEM text; an empty result means the payload was unusable.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::SignedData;
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

const PEM_CERT_MARKER: &str = "-----BEGIN CERTIFICATE-----";

/// OID of the AIA `caIssuers` access method (id-ad-caIssuers).
const OID_CA_ISSUERS: &str = "1.3.6.1.5.5.7.48.2";

/// Normalize a certificate payload to PEM. Returns the input unchanged when
/// it already is PEM, wraps a single DER X.509, explodes a PKCS#7 certs-only
/// payload into concatenated PEM blocks, and returns an empty string when
/// the bytes decode as none of those.
pub(crate) fn ensure_pem(input: &[u8]) -> String {
    if input.is_empty() {
        return String::new();
    }

    let text = String::from_utf8_lossy(input);
    if text.contains(PEM_CERT_MARKER) {
        return text.into_owned();
    }

    // Single DER X.509: validate, then re-wrap the original bytes.
    if X509Certificate::from_der(input).is_ok() {
        return ::pem::encode(&::pem::Pem::new("CERTIFICATE", input.to_vec()));
    }

    // PKCS#7 / CMS certs-only
    if let Some(pems) = pkcs7_certificates(input) {
        return pems;
    }

    String::new()
}

/// Pull every certificate out of a PKCS#7/CMS envelope as concatenated PEM.
fn pkcs7_certificates(input: &[u8]) -> Option<String> {
    let content_info = ContentInfo::from_der(input).ok()?;
    let signed: SignedData = content_info.content.decode_as().ok()?;
    let certs = signed.certificates?;

    let mut out = String::new();
    for choice in certs.0.iter() {
        if let CertificateChoices::Certificate(cert) = choice {
            if let Ok(der) = cert.to_der() {
                out.push_str(&::pem::encode(&::pem::Pem::new("CERTIFICATE", der)));
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// AIA "CA Issuers" URIs from a DER-encoded certificate.
pub(crate) fn ca_issuer_urls(der: &[u8]) -> Vec<String> {
    let Ok((_, cert)) = X509Certificate::from_der(der) else {
        return Vec::new();
    };

    let mut urls = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
            for desc in &aia.accessdescs {
                if desc.access_method.to_id_string() != OID_CA_ISSUERS {
                    continue;
                }
                if let GeneralName::URI(uri) = &desc.access_location {
                    urls.push(uri.to_string());
                }
            }
        }
    }
    urls
}

/// Issuer CN of the first certificate in a PEM block.
pub(crate) fn issuer_common_name(pem_text: &str) -> Option<String> {
    let block = ::pem::parse_many(pem_text.as_bytes())
        .ok()?
        .into_iter()
        .find(|p| p.tag() == "CERTIFICATE")?;
    let der = block.contents().to_vec();
    let (_, cert) = X509Certificate::from_der(&der).ok()?;
    let cn = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())?;
    Some(cn.to_string())
}

/// SHA-256 fingerprint of a DER certificate, lowercase hex.
pub(crate) fn sha256_fingerprint_hex(der: &[u8]) -> String {
    format!("{:x}", Sha256::digest(der))
}

/// File-name sanitization: keep `[A-Za-z0-9._-]`, replace all else with `_`.
pub(crate) fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF_DER: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/leaf.der"
    ));
    const LEAF_PEM: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/leaf.pem"
    ));
    const CERTS_ONLY_P7C: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/data/certs_only.p7c"
    ));

    #[test]
    fn pem_input_passes_through() {
        let out = ensure_pem(LEAF_PEM.as_bytes());
        assert_eq!(out, LEAF_PEM);
    }

    #[test]
    fn der_round_trips_to_pem_and_back() {
        let out = ensure_pem(LEAF_DER);
        assert!(out.starts_with(PEM_CERT_MARKER));

        let parsed = ::pem::parse(out.as_bytes()).unwrap();
        assert_eq!(parsed.tag(), "CERTIFICATE");
        assert_eq!(parsed.contents(), LEAF_DER);

        // ensure_pem(der(pem(x))) == pem(x), up to trailing newline
        let again = ensure_pem(out.trim_end().as_bytes());
        assert_eq!(again.trim_end(), out.trim_end());
    }

    #[test]
    fn pkcs7_certs_only_explodes_every_certificate() {
        let out = ensure_pem(CERTS_ONLY_P7C);
        let blocks = ::pem::parse_many(out.as_bytes()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b.tag() == "CERTIFICATE"));
        // each block must itself be a parseable certificate
        for block in &blocks {
            let der = block.contents().to_vec();
            assert!(X509Certificate::from_der(&der).is_ok());
        }
    }

    #[test]
    fn unusable_bytes_yield_empty() {
        assert_eq!(ensure_pem(b""), "");
        assert_eq!(ensure_pem(b"not a certificate at all"), "");
        assert_eq!(ensure_pem(&[0x30, 0x03, 0x01, 0x01, 0xff]), "");
    }

    #[test]
    fn aia_ca_issuer_urls_from_leaf() {
        let urls = ca_issuer_urls(LEAF_DER);
        assert_eq!(urls, vec!["http://pki.example.test/intermediate.der"]);
    }

    #[test]
    fn issuer_cn_from_pem() {
        let cn = issuer_common_name(LEAF_PEM).unwrap();
        assert_eq!(cn, "Unit Test Intermediate CA");
    }

    #[test]
    fn fingerprint_is_stable_lowercase_hex() {
        let fp = sha256_fingerprint_hex(LEAF_DER);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp, sha256_fingerprint_hex(LEAF_DER));
    }

    #[test]
    fn sanitization_keeps_safe_charset() {
        assert_eq!(sanitize_component("host.example-1_x"), "host.example-1_x");
        assert_eq!(sanitize_component("R3 / Let's Encrypt"), "R3___Let_s_Encrypt");
        assert_eq!(sanitize_component("a:b*c"), "a_b_c");
    }
}
