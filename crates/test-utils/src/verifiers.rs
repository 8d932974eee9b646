use privhelper::identity::{IdentityError, IdentityVerifier, PeerIdentity};

/// Admits every peer.
pub struct AcceptAll;

impl IdentityVerifier for AcceptAll {
    fn verify(&self, _peer: &PeerIdentity) -> Result<bool, IdentityError> {
        Ok(true)
    }
}

/// Refuses every peer.
pub struct RejectAll;

impl IdentityVerifier for RejectAll {
    fn verify(&self, _peer: &PeerIdentity) -> Result<bool, IdentityError> {
        Ok(false)
    }
}

/// Fails every verification, as a broken digest lookup would.
pub struct ErroringVerifier;

impl IdentityVerifier for ErroringVerifier {
    fn verify(&self, _peer: &PeerIdentity) -> Result<bool, IdentityError> {
        Err(IdentityError::MissingPid)
    }
}
