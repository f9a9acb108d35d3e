// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Detached PGP signature verification.

Debian repositories sign `Release` files with a detached signature stored in
`Release.gpg`. The signature file holds one or more PGP signature packets,
usually ASCII armored:

```text
-----BEGIN PGP SIGNATURE-----

iQIzBAABCAAdFiEE...
-----END PGP SIGNATURE-----
```

Verification resolves each signature's issuer against a [Keyring], recomputes the
digest of the signed content plus the signature trailer, and asks the matching
key to validate the signature over that digest. A signature made by any trusted
key is sufficient.
*/

use {
    crate::io::ChecksumHasher,
    chrono::{DateTime, SubsecRound, Utc},
    log::warn,
    pgp::{
        armor::BlockType,
        crypto::{HashAlgorithm, Hasher},
        packet::{Packet, PacketParser, SignatureConfig, SignatureType, Subpacket},
        types::{KeyId, KeyVersion, Mpi, PublicKeyTrait, SecretKeyTrait},
        Signature,
    },
    smallvec::SmallVec,
    std::io::Cursor,
    thiserror::Error,
};

/// Reasons a detached signature failed to verify.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VerificationError {
    #[error("not a valid PGP signature: {0}")]
    Decode(String),

    #[error("signature does not identify its issuer")]
    NoIssuer,

    #[error("no usable signing key for key id {0}")]
    NoMatchingKey(String),

    #[error("signature from key id {0} did not verify: {1}")]
    BadSignature(String, String),

    #[error("unsupported signature hash algorithm: {0:?}")]
    UnsupportedHash(HashAlgorithm),
}

impl VerificationError {
    /// How far verification progressed before failing.
    ///
    /// Used to report the most informative failure when a file carries several
    /// signatures.
    fn progress(&self) -> u8 {
        match self {
            Self::Decode(_) => 0,
            Self::NoIssuer => 1,
            Self::NoMatchingKey(_) => 2,
            Self::UnsupportedHash(_) => 3,
            Self::BadSignature(_, _) => 4,
        }
    }
}

/// A key able to validate signatures.
pub trait SigningKey: Send + Sync {
    /// The 64-bit key id of this key.
    fn id(&self) -> KeyId;

    /// Verify signature material against a precomputed digest.
    fn verify_digest(
        &self,
        hash_algorithm: HashAlgorithm,
        digest: &[u8],
        signature: &[Mpi],
    ) -> pgp::errors::Result<()>;
}

impl<T: PublicKeyTrait + Send + Sync> SigningKey for T {
    fn id(&self) -> KeyId {
        self.key_id()
    }

    fn verify_digest(
        &self,
        hash_algorithm: HashAlgorithm,
        digest: &[u8],
        signature: &[Mpi],
    ) -> pgp::errors::Result<()> {
        self.verify_signature(hash_algorithm, digest, signature)
    }
}

/// A set of trusted keys.
pub trait Keyring: Send + Sync {
    /// Find keys with the given id that are allowed to make signatures.
    fn find_signing_keys(&self, key_id: &KeyId) -> Vec<&dyn SigningKey>;
}

/// Describes a successful verification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureVerification {
    /// Upper case hex of the issuing key id.
    pub key_id: String,

    /// When the signature was made, if recorded.
    pub signed_at: Option<DateTime<Utc>>,

    /// How many keyring keys matched the issuer.
    pub matched_keys: usize,
}

impl SignatureVerification {
    /// Whether the issuer id matched more than one key.
    ///
    /// This is accepted but worth a warning.
    pub fn is_ambiguous(&self) -> bool {
        self.matched_keys > 1
    }
}

/// Render a key id the way `gpg` does.
pub fn format_key_id(key_id: &KeyId) -> String {
    hex::encode_upper(key_id.as_ref())
}

/// Parse signature packets from armored or binary signature data.
pub fn parse_signatures(data: &[u8]) -> Result<Vec<Signature>, VerificationError> {
    let decode = |e: pgp::errors::Error| VerificationError::Decode(format!("{:?}", e));

    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());

    let packets = if data[start..].starts_with(b"-----BEGIN") {
        let mut dearmor = pgp::armor::Dearmor::new(Cursor::new(data));
        dearmor
            .read_header()
            .map_err(|e| VerificationError::Decode(format!("{:?}", e)))?;

        if !matches!(dearmor.typ, Some(BlockType::Signature)) {
            return Err(VerificationError::Decode(
                "armor block is not a PGP SIGNATURE".into(),
            ));
        }

        PacketParser::new(dearmor).collect::<Vec<_>>()
    } else {
        PacketParser::new(Cursor::new(data)).collect::<Vec<_>>()
    };

    let mut signatures = vec![];

    for packet in packets {
        match packet.map_err(decode)? {
            Packet::Signature(signature) => {
                signatures.push(signature);
            }
            packet => {
                return Err(VerificationError::Decode(format!(
                    "unexpected PGP packet; expected Signature; got {:?}",
                    packet.tag()
                )));
            }
        }
    }

    if signatures.is_empty() {
        Err(VerificationError::Decode("no signature packets".into()))
    } else {
        Ok(signatures)
    }
}

/// Resolve the key id that made a signature.
///
/// Falls back to the low 64 bits of a v4 issuer fingerprint when no explicit
/// issuer subpacket is present.
fn issuer_key_id(signature: &Signature) -> Option<KeyId> {
    if let Some(issuer) = signature.issuer() {
        return Some(issuer.clone());
    }

    signature
        .config
        .hashed_subpackets
        .iter()
        .chain(signature.config.unhashed_subpackets.iter())
        .find_map(|packet| match packet {
            Subpacket::IssuerFingerprint(KeyVersion::V4, fingerprint) if fingerprint.len() == 20 => {
                KeyId::from_slice(&fingerprint[12..]).ok()
            }
            _ => None,
        })
}

/// Convert line endings to CRLF, as required when hashing text signatures.
fn canonical_text(data: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(data.len() + data.len() / 32);
    let mut previous = 0u8;

    for &byte in data {
        if byte == b'\n' && previous != b'\r' {
            res.push(b'\r');
        }
        res.push(byte);
        previous = byte;
    }

    res
}

/// Compute the digest a signature is made over.
fn signature_digest(signature: &Signature, data: &[u8]) -> Result<Vec<u8>, VerificationError> {
    let mut hasher = Box::new(
        ChecksumHasher::from_pgp_algorithm(signature.config.hash_alg)
            .ok_or(VerificationError::UnsupportedHash(signature.config.hash_alg))?,
    );

    if matches!(signature.config.typ, SignatureType::Text) {
        hasher.update(&canonical_text(data));
    } else {
        hasher.update(data);
    }

    let len = signature
        .config
        .hash_signature_data(&mut *hasher)
        .map_err(|e| VerificationError::Decode(format!("{:?}", e)))?;
    hasher.update(&signature.config.trailer(len));

    Ok(hasher.finish())
}

fn verify_signature(
    keyring: &dyn Keyring,
    signature: &Signature,
    data: &[u8],
) -> Result<SignatureVerification, VerificationError> {
    let key_id = issuer_key_id(signature).ok_or(VerificationError::NoIssuer)?;
    let key_id_hex = format_key_id(&key_id);

    let keys = keyring.find_signing_keys(&key_id);
    if keys.is_empty() {
        return Err(VerificationError::NoMatchingKey(key_id_hex));
    }

    let digest = signature_digest(signature, data)?;

    if digest[0..2] != signature.signed_hash_value {
        return Err(VerificationError::BadSignature(
            key_id_hex,
            "signed hash value does not match content".into(),
        ));
    }

    let mut last_error = None;

    for key in &keys {
        match key.verify_digest(signature.config.hash_alg, &digest, &signature.signature) {
            Ok(()) => {
                return Ok(SignatureVerification {
                    key_id: key_id_hex,
                    signed_at: signature.created().cloned(),
                    matched_keys: keys.len(),
                });
            }
            Err(e) => {
                last_error = Some(format!("{:?}", e));
            }
        }
    }

    Err(VerificationError::BadSignature(
        key_id_hex,
        last_error.unwrap_or_default(),
    ))
}

/// Verify a detached signature over `data` against trusted keys.
///
/// `signature_data` may contain several signatures. Verification succeeds as soon
/// as one of them verifies. Otherwise the failure of the signature that got
/// furthest is returned.
pub fn verify_detached_signature(
    keyring: &dyn Keyring,
    data: &[u8],
    signature_data: &[u8],
) -> Result<SignatureVerification, VerificationError> {
    let mut best_error: Option<VerificationError> = None;

    for signature in parse_signatures(signature_data)? {
        match verify_signature(keyring, &signature, data) {
            Ok(verification) => {
                if verification.is_ambiguous() {
                    warn!(
                        "key id {} matches {} keys in keyring",
                        verification.key_id, verification.matched_keys
                    );
                }

                return Ok(verification);
            }
            Err(e) => {
                best_error = match best_error {
                    Some(best) if best.progress() >= e.progress() => Some(best),
                    _ => Some(e),
                };
            }
        }
    }

    Err(best_error.unwrap_or(VerificationError::NoIssuer))
}

/// Produce an armored detached signature over data.
///
/// This is the format of `Release.gpg` files.
pub fn detached_sign<PW>(
    key: &impl SecretKeyTrait,
    key_pw: PW,
    hash_algorithm: HashAlgorithm,
    data: &[u8],
) -> pgp::errors::Result<String>
where
    PW: FnOnce() -> String,
{
    let hashed_subpackets = vec![
        Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
        Subpacket::SignatureCreationTime(Utc::now().trunc_subsecs(0)),
    ];
    let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

    let config = SignatureConfig::new_v4(
        Default::default(),
        SignatureType::Binary,
        key.algorithm(),
        hash_algorithm,
        hashed_subpackets,
        unhashed_subpackets,
    );

    let signature = config.sign(key, key_pw, Cursor::new(data))?;

    let packet = Packet::Signature(signature);
    let mut writer = Cursor::new(Vec::<u8>::new());
    pgp::armor::write(&packet, BlockType::Signature, &mut writer, None)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| pgp::errors::Error::Utf8Error(e.utf8_error()))
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            keyring::PgpKeyring,
            signing_key::{bare_signature, non_signing_key_pair, test_key_pair},
        },
        pgp::types::KeyTrait,
    };

    const DATA: &[u8] = b"Origin: Debian\nDate: Sat, 09 Oct 2021 09:34:56 UTC\n";

    #[test]
    fn sign_and_verify() -> pgp::errors::Result<()> {
        let (private, public) = test_key_pair("Signer <signer@example.com>")?;
        let (_, other_public) = test_key_pair("Other <other@example.com>")?;

        let signature = detached_sign(&private, String::new, HashAlgorithm::SHA2_256, DATA)?;
        assert!(signature.starts_with("-----BEGIN PGP SIGNATURE-----"));

        let keyring = PgpKeyring::new(vec![public.clone()]);
        let verification = verify_detached_signature(&keyring, DATA, signature.as_bytes())
            .expect("signature should verify");
        assert_eq!(verification.key_id, format_key_id(&public.key_id()));
        assert!(verification.signed_at.is_some());
        assert!(!verification.is_ambiguous());

        // Any modification of the content is detected.
        let mut tampered = DATA.to_vec();
        tampered[0] = b'X';
        assert!(matches!(
            verify_detached_signature(&keyring, &tampered, signature.as_bytes()),
            Err(VerificationError::BadSignature(_, _))
        ));

        // Keys not in the keyring are not trusted.
        let untrusted = PgpKeyring::new(vec![other_public.clone()]);
        assert_eq!(
            verify_detached_signature(&untrusted, DATA, signature.as_bytes()),
            Err(VerificationError::NoMatchingKey(format_key_id(
                &public.key_id()
            )))
        );

        // Duplicate keys are accepted but reported.
        let duplicated = PgpKeyring::new(vec![public.clone(), public, other_public]);
        let verification = verify_detached_signature(&duplicated, DATA, signature.as_bytes())
            .expect("signature should verify");
        assert_eq!(verification.matched_keys, 2);
        assert!(verification.is_ambiguous());

        Ok(())
    }

    #[test]
    fn signature_without_issuer() -> pgp::errors::Result<()> {
        let (private, public) = test_key_pair("Signer <signer@example.com>")?;

        let packet = Packet::Signature(bare_signature(&private, DATA)?);
        let mut writer = Cursor::new(Vec::<u8>::new());
        pgp::armor::write(&packet, BlockType::Signature, &mut writer, None)?;
        let armored = writer.into_inner();

        let keyring = PgpKeyring::new(vec![public]);
        assert_eq!(
            verify_detached_signature(&keyring, DATA, &armored),
            Err(VerificationError::NoIssuer)
        );

        Ok(())
    }

    #[test]
    fn key_without_sign_flag() -> pgp::errors::Result<()> {
        let (private, public) = non_signing_key_pair("Certifier <certifier@example.com>")?;

        let signature = detached_sign(&private, String::new, HashAlgorithm::SHA2_256, DATA)?;

        let keyring = PgpKeyring::new(vec![public.clone()]);
        assert_eq!(
            verify_detached_signature(&keyring, DATA, signature.as_bytes()),
            Err(VerificationError::NoMatchingKey(format_key_id(
                &public.key_id()
            )))
        );

        Ok(())
    }

    #[test]
    fn undecodable_signatures() {
        let keyring = PgpKeyring::new(vec![]);

        assert!(matches!(
            verify_detached_signature(&keyring, DATA, b"not a signature"),
            Err(VerificationError::Decode(_))
        ));
        assert!(matches!(
            verify_detached_signature(
                &keyring,
                DATA,
                b"-----BEGIN PGP MESSAGE-----\n\nowGbwMvMwMEYLmM=\n-----END PGP MESSAGE-----\n"
            ),
            Err(VerificationError::Decode(_))
        ));
        assert!(matches!(
            verify_detached_signature(&keyring, DATA, b""),
            Err(VerificationError::Decode(_))
        ));
    }

    #[test]
    fn text_canonicalization() {
        assert_eq!(canonical_text(b"a\nb\r\nc"), b"a\r\nb\r\nc".to_vec());
        assert_eq!(canonical_text(b""), Vec::<u8>::new());
    }
}
