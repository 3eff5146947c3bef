//! The in-memory identity: both post-quantum key pairs plus the
//! identifier derived from them.

use zerotrace_crypto::{KemKeyPair, KemPrivateKey, KemPublicKey, SigKeyPair, SigPrivateKey, SigPublicKey};

use crate::{Identifier, Result};

/// A complete ZeroTrace identity.
///
/// Created once at first unlock and treated as immutable afterwards;
/// key rotation produces a new `Identity` (and a new identifier).
pub struct Identity {
    kem: KemKeyPair,
    sig: SigKeyPair,
    identifier: Identifier,
}

impl Identity {
    /// Generate a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self> {
        let kem = KemKeyPair::generate()?;
        let sig = SigKeyPair::generate()?;
        let identifier =
            Identifier::from_public_keys(&kem.public.to_bytes(), &sig.public.to_bytes());
        Ok(Self {
            kem,
            sig,
            identifier,
        })
    }

    /// Rebuild an identity from serialized key material.
    ///
    /// # Errors
    ///
    /// Returns an error if any key fails to decode.
    pub fn from_key_material(
        kem_public: &[u8],
        kem_private: &[u8],
        sig_public: &[u8],
        sig_private: &[u8],
    ) -> Result<Self> {
        let kem = KemKeyPair::from_bytes(kem_public, kem_private)?;
        let sig = SigKeyPair::from_bytes(sig_public, sig_private)?;
        let identifier = Identifier::from_public_keys(kem_public, sig_public);
        Ok(Self {
            kem,
            sig,
            identifier,
        })
    }

    /// The self-certifying identifier.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// The KEM public key (for encapsulation by peers).
    pub fn kem_public(&self) -> &KemPublicKey {
        &self.kem.public
    }

    /// The KEM private key (for decapsulation).
    pub fn kem_private(&self) -> &KemPrivateKey {
        &self.kem.private
    }

    /// The signature public key (for verification by peers).
    pub fn sig_public(&self) -> &SigPublicKey {
        &self.sig.public
    }

    /// The signature private key (for signing).
    pub fn sig_private(&self) -> &SigPrivateKey {
        &self.sig.private
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_binds_to_keys() {
        let identity = Identity::generate().unwrap();
        let id = Identifier::from_public_keys(
            &identity.kem_public().to_bytes(),
            &identity.sig_public().to_bytes(),
        );
        assert_eq!(identity.identifier(), &id);
    }

    #[test]
    fn test_identities_are_unique() {
        let a = Identity::generate().unwrap();
        let b = Identity::generate().unwrap();
        assert_ne!(a.identifier(), b.identifier());
    }

    #[test]
    fn test_from_key_material_preserves_identifier() {
        let identity = Identity::generate().unwrap();
        let restored = Identity::from_key_material(
            &identity.kem_public().to_bytes(),
            &identity.kem_private().to_bytes(),
            &identity.sig_public().to_bytes(),
            &identity.sig_private().to_bytes(),
        )
        .unwrap();
        assert_eq!(identity.identifier(), restored.identifier());
    }
}
