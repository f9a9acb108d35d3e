// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generated key material for exercising signature verification. */

use {
    pgp::{
        crypto::HashAlgorithm,
        packet::{SignatureConfig, SignatureType},
        types::{KeyTrait, SecretKeyTrait},
        KeyType, SecretKeyParamsBuilder, Signature, SignedPublicKey, SignedSecretKey,
    },
    smallvec::smallvec,
    std::io::Cursor,
};

/// Generate an unlocked RSA key pair whose self signature carries key flags.
///
/// Keys that can't sign may certify instead, so their flags are never empty.
fn generate_key_pair(
    user_id: &str,
    can_sign: bool,
) -> pgp::errors::Result<(SignedSecretKey, SignedPublicKey)> {
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::Rsa(2048))
        .can_sign(can_sign)
        .can_create_certificates(!can_sign)
        .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
        .primary_user_id(user_id.to_string())
        .build()?;

    let secret = params.generate()?.sign(String::new)?;
    let public = secret.public_key().sign(&secret, String::new)?;

    Ok((secret, public))
}

/// A key pair allowed to sign `Release` files.
pub(crate) fn test_key_pair(
    user_id: &str,
) -> pgp::errors::Result<(SignedSecretKey, SignedPublicKey)> {
    generate_key_pair(user_id, true)
}

/// A key pair whose flags withhold signing capability.
pub(crate) fn non_signing_key_pair(
    user_id: &str,
) -> pgp::errors::Result<(SignedSecretKey, SignedPublicKey)> {
    generate_key_pair(user_id, false)
}

/// A binary signature over `data` carrying no subpackets at all.
///
/// It names neither an issuer nor a creation time.
pub(crate) fn bare_signature(key: &SignedSecretKey, data: &[u8]) -> pgp::errors::Result<Signature> {
    SignatureConfig::new_v4(
        Default::default(),
        SignatureType::Binary,
        key.algorithm(),
        HashAlgorithm::SHA2_256,
        vec![],
        vec![],
    )
    .sign(key, String::new, Cursor::new(data))
}

#[cfg(test)]
mod test {
    use {super::*, pgp::packet::Subpacket};

    #[test]
    fn key_flags_follow_request() -> pgp::errors::Result<()> {
        let (private, public) = test_key_pair("Mirror <mirror@example.com>")?;
        assert_eq!(private.key_id(), public.key_id());

        let flags = |key: &SignedPublicKey| {
            key.details
                .users
                .iter()
                .flat_map(|u| u.signatures.iter())
                .map(|sig| sig.key_flags().sign())
                .collect::<Vec<_>>()
        };

        assert_eq!(flags(&public), vec![true]);

        let (_, public) = non_signing_key_pair("Archive Encryption <enc@example.com>")?;
        assert_eq!(flags(&public), vec![false]);

        let signature = bare_signature(&private, b"data")?;
        assert!(signature.issuer().is_none());
        assert!(!signature
            .config
            .hashed_subpackets
            .iter()
            .any(|p| matches!(p, Subpacket::KeyFlags(_))));

        Ok(())
    }
}
