//! Challenge/response authentication
//!
//! The server sends a fresh 32-byte nonce; the client answers with its
//! public key, claimed name, and an Ed25519 signature over `nonce || name`.
//! Rejections are reported to the client via `AUTH_RESULT` and the session
//! is closed. Decision order: name validity, signature, registry bindings,
//! connected-key uniqueness.

use gridvoice_core::constants::names::MAX_NAME_LEN;
use gridvoice_core::crypto;
use gridvoice_protocol::AuthCode;

use crate::registry::PlayerRegistry;
use crate::storage::IdentityStore;

/// A name is 1..=32 bytes of printable, non-whitespace-only UTF-8.
pub fn validate_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    name.chars().all(|c| !c.is_control()) && !name.trim().is_empty()
}

/// Decide an `AUTH_RESPONSE` against the persistent registry. Registers the
/// binding when both name and key are unseen. The connected-key uniqueness
/// check happens later, atomically, at registry insert.
pub fn decide(
    store: &IdentityStore,
    nonce: &[u8; 32],
    public_key: &[u8; 32],
    name: &str,
    signature: &[u8; 64],
) -> AuthCode {
    if !validate_name(name) {
        return AuthCode::InvalidName;
    }
    if !crypto::verify_challenge(public_key, nonce, name, signature) {
        return AuthCode::InvalidSignature;
    }

    let existing_key = store.public_key(name);
    let existing_name = store.name_for_key(public_key);
    match (existing_key, existing_name) {
        (Some(key), _) if key != *public_key => AuthCode::NameTaken,
        (_, Some(other)) if other != name => AuthCode::KeyMismatch,
        (None, None) => match store.register(name, public_key) {
            Ok(true) => AuthCode::Success,
            // Lost a race with a concurrent registration of the same name
            Ok(false) => AuthCode::NameTaken,
            Err(e) => {
                tracing::error!(%name, error = %e, "identity registration failed");
                AuthCode::NameTaken
            }
        },
        _ => AuthCode::Success,
    }
}

/// Final admission step: a key may be connected only once.
pub fn admit(registry: &PlayerRegistry, player: std::sync::Arc<crate::player::Player>) -> AuthCode {
    if registry.try_insert(player) {
        AuthCode::Success
    } else {
        AuthCode::AlreadyConnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridvoice_core::crypto::Keypair;
    use tempfile::TempDir;

    fn store() -> (TempDir, IdentityStore) {
        let dir = TempDir::new().unwrap();
        let store = IdentityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn respond(keypair: &Keypair, nonce: &[u8; 32], name: &str) -> ([u8; 32], [u8; 64]) {
        (keypair.public_bytes(), keypair.sign_challenge(nonce, name))
    }

    #[test]
    fn name_rules() {
        assert!(validate_name("alice"));
        assert!(validate_name("Alice Bob"));
        assert!(!validate_name(""));
        assert!(!validate_name("   "));
        assert!(!validate_name("a\nb"));
        assert!(!validate_name(&"x".repeat(33)));
        assert!(validate_name(&"x".repeat(32)));
    }

    #[test]
    fn fresh_registration_succeeds() {
        let (_dir, store) = store();
        let keypair = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&keypair, &nonce, "alice");
        assert_eq!(decide(&store, &nonce, &key, "alice", &sig), AuthCode::Success);
        assert_eq!(store.public_key("alice"), Some(key));
    }

    #[test]
    fn returning_player_succeeds() {
        let (_dir, store) = store();
        let keypair = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&keypair, &nonce, "alice");
        assert_eq!(decide(&store, &nonce, &key, "alice", &sig), AuthCode::Success);

        let nonce2 = crypto::generate_nonce();
        let (key, sig) = respond(&keypair, &nonce2, "alice");
        assert_eq!(decide(&store, &nonce2, &key, "alice", &sig), AuthCode::Success);
    }

    #[test]
    fn name_collision_with_different_key() {
        let (_dir, store) = store();
        let alice = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&alice, &nonce, "alice");
        decide(&store, &nonce, &key, "alice", &sig);

        let impostor = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&impostor, &nonce, "alice");
        assert_eq!(
            decide(&store, &nonce, &key, "alice", &sig),
            AuthCode::NameTaken
        );
    }

    #[test]
    fn key_bound_to_other_name() {
        let (_dir, store) = store();
        let alice = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&alice, &nonce, "alice");
        decide(&store, &nonce, &key, "alice", &sig);

        let nonce = crypto::generate_nonce();
        let (key, sig) = respond(&alice, &nonce, "bob");
        assert_eq!(
            decide(&store, &nonce, &key, "bob", &sig),
            AuthCode::KeyMismatch
        );
    }

    #[test]
    fn bad_signature_rejected() {
        let (_dir, store) = store();
        let keypair = Keypair::generate();
        let nonce = crypto::generate_nonce();
        // Signature over a different nonce
        let sig = keypair.sign_challenge(&crypto::generate_nonce(), "alice");
        assert_eq!(
            decide(&store, &nonce, &keypair.public_bytes(), "alice", &sig),
            AuthCode::InvalidSignature
        );
    }

    #[test]
    fn invalid_name_rejected_before_signature_check() {
        let (_dir, store) = store();
        let keypair = Keypair::generate();
        let nonce = crypto::generate_nonce();
        let sig = keypair.sign_challenge(&nonce, "");
        assert_eq!(
            decide(&store, &nonce, &keypair.public_bytes(), "", &sig),
            AuthCode::InvalidName
        );
    }
}
