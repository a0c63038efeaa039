//! AES-256-GCM sealing for credential material at rest.
//!
//! Token secrets are sealed into `nonce (12 bytes) || ciphertext`, base64
//! encoded, before any store backend sees them. The key is derived from the
//! operator's session secret via SHA-256.

// crates.io
use aes_gcm::{
	AeadCore, Aes256Gcm, Key, Nonce,
	aead::{Aead, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::TokenSecret};

const NONCE_LEN: usize = 12;

/// Errors raised while sealing or opening credential material.
///
/// Messages never carry plaintext or ciphertext fragments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CryptoError {
	/// Sealing failed inside the AEAD implementation.
	#[error("Credential sealing failed.")]
	Seal,
	/// Ciphertext failed authentication or the key does not match.
	#[error("Credential could not be opened with the configured key.")]
	Open,
	/// Ciphertext is not valid base64 or is shorter than a nonce.
	#[error("Sealed credential payload is malformed.")]
	MalformedCiphertext,
	/// Opened bytes are not valid UTF-8.
	#[error("Opened credential is not valid UTF-8.")]
	InvalidUtf8,
}

/// Base64-encoded sealed secret as persisted by store backends.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);
impl SealedSecret {
	/// Wraps an already sealed base64 payload.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the base64 ciphertext view.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for SealedSecret {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Debug for SealedSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SealedSecret").field(&"<sealed>").finish()
	}
}

/// AES-256-GCM cipher guarding credentials at rest.
#[derive(Clone)]
pub struct CredentialCipher {
	key: [u8; 32],
}
impl CredentialCipher {
	/// Derives the sealing key from the operator's session secret via SHA-256.
	pub fn from_secret(secret: impl AsRef<[u8]>) -> Self {
		let mut hasher = Sha256::new();

		hasher.update(secret.as_ref());

		Self { key: hasher.finalize().into() }
	}

	/// Seals plaintext bytes into `nonce || ciphertext`.
	pub fn seal_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|_| CryptoError::Seal)?;
		let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());

		sealed.extend_from_slice(&nonce);
		sealed.extend_from_slice(&ciphertext);

		Ok(sealed)
	}

	/// Opens `nonce || ciphertext` produced by [`seal_bytes`](Self::seal_bytes).
	pub fn open_bytes(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
		if sealed.len() < NONCE_LEN {
			return Err(CryptoError::MalformedCiphertext);
		}

		let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

		cipher
			.decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
			.map_err(|_| CryptoError::Open)
	}

	/// Seals a token secret into its base64 at-rest representation.
	pub fn seal_secret(&self, plaintext: &str) -> Result<SealedSecret, CryptoError> {
		let sealed = self.seal_bytes(plaintext.as_bytes())?;

		Ok(SealedSecret(URL_SAFE_NO_PAD.encode(sealed)))
	}

	/// Opens a sealed secret back into a redacting [`TokenSecret`].
	pub fn open_secret(&self, sealed: &SealedSecret) -> Result<TokenSecret, CryptoError> {
		let bytes =
			URL_SAFE_NO_PAD.decode(&sealed.0).map_err(|_| CryptoError::MalformedCiphertext)?;
		let opened = self.open_bytes(&bytes)?;
		let value = String::from_utf8(opened).map_err(|_| CryptoError::InvalidUtf8)?;

		Ok(TokenSecret::new(value))
	}
}
impl Debug for CredentialCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialCipher").field("key", &"<redacted>").finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn seal_open_round_trip() {
		let cipher = CredentialCipher::from_secret("session-secret");
		let sealed = cipher.seal_secret("token-value").expect("Sealing should succeed.");
		let opened = cipher.open_secret(&sealed).expect("Opening should succeed.");

		assert_eq!(opened.expose(), "token-value");
	}

	#[test]
	fn sealed_output_is_nondeterministic() {
		let cipher = CredentialCipher::from_secret("session-secret");
		let lhs = cipher.seal_secret("token-value").expect("First sealing should succeed.");
		let rhs = cipher.seal_secret("token-value").expect("Second sealing should succeed.");

		assert_ne!(lhs.as_str(), rhs.as_str());
		assert_eq!(
			cipher.open_secret(&lhs).expect("First opening should succeed.").expose(),
			cipher.open_secret(&rhs).expect("Second opening should succeed.").expose(),
		);
	}

	#[test]
	fn sealed_output_hides_plaintext() {
		let cipher = CredentialCipher::from_secret("session-secret");
		let sealed = cipher.seal_secret("visible-token").expect("Sealing should succeed.");

		assert!(!sealed.as_str().contains("visible-token"));
		assert_eq!(format!("{sealed:?}"), "SealedSecret(\"<sealed>\")");
	}

	#[test]
	fn wrong_key_fails_without_leaking() {
		let sealing = CredentialCipher::from_secret("key-one");
		let opening = CredentialCipher::from_secret("key-two");
		let sealed = sealing.seal_secret("secret-token").expect("Sealing should succeed.");
		let err = opening.open_secret(&sealed).expect_err("Wrong key must fail to open.");

		assert_eq!(err, CryptoError::Open);
		assert!(!err.to_string().contains("secret-token"));
	}

	#[test]
	fn tampered_ciphertext_fails() {
		let cipher = CredentialCipher::from_secret("session-secret");
		let sealed = cipher.seal_secret("token-value").expect("Sealing should succeed.");
		let mut bytes =
			URL_SAFE_NO_PAD.decode(sealed.as_str()).expect("Sealed payload should be base64.");

		if let Some(last) = bytes.last_mut() {
			*last ^= 0xFF;
		}

		let tampered = SealedSecret::new(URL_SAFE_NO_PAD.encode(bytes));

		assert_eq!(cipher.open_secret(&tampered), Err(CryptoError::Open));
	}

	#[test]
	fn malformed_payloads_are_rejected() {
		let cipher = CredentialCipher::from_secret("session-secret");

		assert_eq!(
			cipher.open_secret(&SealedSecret::new("not-base64!!!")),
			Err(CryptoError::MalformedCiphertext),
		);
		assert_eq!(
			cipher.open_secret(&SealedSecret::new(URL_SAFE_NO_PAD.encode([0_u8; 5]))),
			Err(CryptoError::MalformedCiphertext),
		);
	}
}
