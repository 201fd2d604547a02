//! Tests for secret handling.

use super::*;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

fn test_cipher() -> AesGcmSecretCipher {
    AesGcmSecretCipher::from_hex(TEST_KEY).unwrap()
}

mod secret_string_tests {
    use super::*;

    /// Verify that Debug output never contains the secret value.
    #[test]
    fn test_debug_redacts_value() {
        let secret = SecretString::new("wJalrXUtnFEMI");
        let debug_str = format!("{:?}", secret);

        assert!(!debug_str.contains("wJalrXUtnFEMI"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn test_expose_secret_returns_plaintext() {
        let secret = SecretString::from("abc".to_string());
        assert_eq!(secret.expose_secret(), "abc");
        assert!(!secret.is_empty());
    }
}

mod cipher_tests {
    use super::*;

    /// Verify that an encrypted value decrypts back to the plaintext.
    #[test]
    fn test_encrypt_then_decrypt_yields_plaintext() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("wJalrXUtnFEMI/K7MDENG").unwrap();

        assert_eq!(stored.split(':').count(), 3);
        assert!(!stored.contains("wJalrXUtnFEMI"));

        let decrypted = cipher.decrypt("secret_key", &stored).unwrap();
        assert_eq!(decrypted.expose_secret(), "wJalrXUtnFEMI/K7MDENG");
    }

    /// Verify that each encryption uses a fresh nonce.
    #[test]
    fn test_encrypt_uses_fresh_nonce() {
        let cipher = test_cipher();
        let first = cipher.encrypt("same").unwrap();
        let second = cipher.encrypt("same").unwrap();
        assert_ne!(first, second);
    }

    /// Verify that a value encrypted with another key is rejected.
    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let stored = test_cipher().encrypt("secret").unwrap();
        let other = AesGcmSecretCipher::new([7u8; 32]);

        let result = other.decrypt("secret_key", &stored);
        assert!(matches!(
            result,
            Err(ConfigurationError::Decryption { ref key, .. }) if key == "secret_key"
        ));
    }

    #[test]
    fn test_decrypt_malformed_value_fails() {
        let cipher = test_cipher();

        assert!(cipher.decrypt("secret_key", "not-encrypted").is_err());
        assert!(cipher.decrypt("secret_key", "zz:00:00").is_err());
        assert!(cipher.decrypt("secret_key", "0011:00:00").is_err());
    }

    #[test]
    fn test_from_hex_rejects_short_key() {
        let result = AesGcmSecretCipher::from_hex("0011");
        assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let result = AesGcmSecretCipher::from_hex("not hex at all");
        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }

    #[test]
    fn test_cipher_debug_redacts_key() {
        let debug_str = format!("{:?}", test_cipher());
        assert!(!debug_str.contains("0001020304"));
    }
}
