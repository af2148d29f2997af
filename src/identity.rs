//! Wallet addresses and chat identities.
//!
//! TextRP user ids embed the owner's XRPL classic address in the localpart
//! (`@rWallet...:matrix.textrp.io`), so the sender of a chat message is also
//! the claimant wallet.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{FaucetError, FaucetResult};

pub const MIN_CLASSIC_ADDRESS_LEN: usize = 25;
pub const MAX_CLASSIC_ADDRESS_LEN: usize = 35;
pub const MAX_USER_ID_LEN: usize = 255;

/// Version byte + 20-byte account id.
const ACCOUNT_PAYLOAD_LEN: usize = 21;
const ACCOUNT_ID_VERSION: u8 = 0x00;

/// Family seeds carry 16 bytes of entropy behind a type prefix.
const SEED_ENTROPY_LEN: usize = 16;
const SECP256K1_SEED_PREFIX: &[u8] = &[0x21];
const ED25519_SEED_PREFIX: &[u8] = &[0x01, 0xE1, 0x4B];

const _: [(); MAX_USER_ID_LEN - MAX_CLASSIC_ADDRESS_LEN] =
    [(); MAX_USER_ID_LEN - MAX_CLASSIC_ADDRESS_LEN];

/// Checks an XRPL classic address: `r` prefix, length bounds, ripple base58
/// alphabet, account version byte and checksum.
pub fn validate_classic_address(value: &str) -> FaucetResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FaucetError::Validation("wallet address cannot be empty".to_string()));
    }
    if !trimmed.starts_with('r') {
        return Err(FaucetError::Validation(format!(
            "wallet address {trimmed} must start with 'r'"
        )));
    }
    if trimmed.len() < MIN_CLASSIC_ADDRESS_LEN || trimmed.len() > MAX_CLASSIC_ADDRESS_LEN {
        return Err(FaucetError::Validation(format!(
            "wallet address must be {MIN_CLASSIC_ADDRESS_LEN}-{MAX_CLASSIC_ADDRESS_LEN} characters"
        )));
    }

    let decoded = bs58::decode(trimmed)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_ID_VERSION))
        .into_vec()
        .map_err(|err| FaucetError::Validation(format!("wallet address {trimmed} is invalid: {err}")))?;
    if decoded.len() != ACCOUNT_PAYLOAD_LEN {
        return Err(FaucetError::Validation(format!(
            "wallet address {trimmed} decodes to {} bytes",
            decoded.len()
        )));
    }

    Ok(trimmed.to_string())
}

/// Checks that a wallet seed is a well-formed secp256k1 (`s...`) or ed25519
/// (`sEd...`) family seed. The error never echoes the seed.
pub fn validate_seed_format(seed: &SecretString) -> FaucetResult<()> {
    let encoded = seed.expose_secret().trim();
    if !encoded.starts_with('s') {
        return Err(FaucetError::Validation(
            "hot wallet seed must start with 's'".to_string(),
        ));
    }
    let decoded = bs58::decode(encoded)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(None)
        .into_vec()
        .map_err(|_| FaucetError::Validation("hot wallet seed is not valid base58".to_string()))?;

    let known_family = [SECP256K1_SEED_PREFIX, ED25519_SEED_PREFIX]
        .iter()
        .any(|prefix| {
            decoded.len() == prefix.len() + SEED_ENTROPY_LEN && decoded.starts_with(prefix)
        });
    if !known_family {
        return Err(FaucetError::Validation(
            "hot wallet seed has an unknown key type".to_string(),
        ));
    }
    Ok(())
}

pub fn is_valid_classic_address(value: &str) -> bool {
    validate_classic_address(value).is_ok()
}

/// Extracts and validates the wallet embedded in a chat user id.
pub fn wallet_from_user_id(user_id: &str) -> FaucetResult<String> {
    let trimmed = user_id.trim();
    if trimmed.len() > MAX_USER_ID_LEN {
        return Err(FaucetError::Validation("user id is too long".to_string()));
    }
    let localpart = trimmed
        .strip_prefix('@')
        .and_then(|rest| rest.split(':').next())
        .filter(|localpart| !localpart.is_empty())
        .ok_or_else(|| {
            FaucetError::Validation(format!("could not extract a wallet from user id {trimmed}"))
        })?;
    validate_classic_address(localpart)
}

/// Lowercased user id used for admin membership checks.
pub fn normalize_user_id(user_id: &str) -> String {
    user_id.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[test]
    fn accepts_known_addresses() {
        assert!(is_valid_classic_address(GENESIS));
        assert!(is_valid_classic_address("rPT1Sjq2YGrBMTttX4GZHjKu9dyfzbpAYe"));
        assert!(is_valid_classic_address("  rf1BiGeXwwQoi8Z2ueFYTEXSwuJYfV2Jpn "));
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(!is_valid_classic_address(""));
        assert!(!is_valid_classic_address("invalid"));
        assert!(!is_valid_classic_address("xHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh"));
        // single character flipped breaks the checksum
        assert!(!is_valid_classic_address("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTi"));
        // '0' is outside the ripple alphabet
        assert!(!is_valid_classic_address("rHb9CJAWyB4rj91VRWn96DkukG4bwdty0h"));
    }

    #[test]
    fn extracts_wallet_from_user_id() {
        let wallet = wallet_from_user_id(&format!("@{GENESIS}:matrix.textrp.io")).unwrap();
        assert_eq!(wallet, GENESIS);

        assert!(wallet_from_user_id(GENESIS).is_err());
        assert!(wallet_from_user_id("@alice:matrix.textrp.io").is_err());
        assert!(wallet_from_user_id("@:matrix.textrp.io").is_err());
    }

    #[test]
    fn seed_format_checks() {
        let seed = |value: &str| SecretString::from(value.to_string());
        assert!(validate_seed_format(&seed("snoPBrXtMeMyMHUVTgbuqAfg1SUTb")).is_ok());
        assert!(validate_seed_format(&seed(" snoPBrXtMeMyMHUVTgbuqAfg1SUTb ")).is_ok());

        assert!(validate_seed_format(&seed("")).is_err());
        assert!(validate_seed_format(&seed("not-a-seed")).is_err());
        // an account address is base58check too, but not a seed
        assert!(validate_seed_format(&seed(GENESIS)).is_err());

        let err = validate_seed_format(&seed("snoPBrXtMeMyMHUVTgbuqAfg1SUTc")).unwrap_err();
        assert!(!err.to_string().contains("snoPBrXtMeMyMHUVTgbuqAfg1SUT"));
    }

    #[test]
    fn user_id_normalization() {
        assert_eq!(normalize_user_id(" @Admin:Example.org "), "@admin:example.org");
    }
}
