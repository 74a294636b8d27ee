use crate::error::{ChainError, Result};
use crate::U256;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Version byte prefixed to the address payload before Base58Check encoding.
pub const ADDRESS_VERSION: u8 = 0x00;

fn double_sha256_digest(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// A 32-byte double-SHA-256 hash, compared numerically against targets.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(U256);

impl Hash {
    /// `sha256(sha256(data))`, the identity hash for blocks and transactions.
    pub fn double_sha256(data: &[u8]) -> Self {
        Hash(U256::from_big_endian(&double_sha256_digest(data)))
    }

    /// Hash of the canonical JSON form of `value` (sorted keys, UTF-8 bytes).
    pub fn of_canonical<T: Serialize>(value: &T) -> Self {
        Hash::double_sha256(canonical_json(value).as_bytes())
    }

    pub fn zero() -> Self {
        Hash(U256::zero())
    }

    /// Proof-of-work check: the hash must be numerically below the target.
    pub fn matches_target(&self, target: U256) -> bool {
        self.0 < target
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::malformed(format!("hash is not hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(ChainError::malformed(format!(
                "hash must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Hash(U256::from_big_endian(&bytes)))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(D::Error::custom)
    }
}

/// secp256k1 signing key. Signing is deterministic (RFC 6979).
#[derive(Clone, Debug)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn new_key() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Sign a 32-byte message hash.
    pub fn sign(&self, message: &Hash) -> Signature {
        Signature(self.0.sign(&message.to_bytes()))
    }
}

/// secp256k1 verifying key, carried on the wire as compressed SEC1 hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn to_sec1_hex(&self) -> String {
        hex::encode(self.0.to_encoded_point(true).as_bytes())
    }

    pub fn from_sec1_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::InvalidKey(format!("public key is not hex: {e}")))?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|e| ChainError::InvalidKey(format!("bad SEC1 public key: {e}")))?;
        Ok(PublicKey(key))
    }

    /// Derive the Base58Check address that owns outputs paid to this key.
    pub fn address(&self) -> Address {
        let sha = Sha256::digest(self.0.to_encoded_point(true).as_bytes());
        let rip = Ripemd160::digest(sha);
        Address::from_payload(rip.into())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_sec1_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_sec1_hex(&s).map_err(D::Error::custom)
    }
}

/// ECDSA signature, 64-byte compact form, hex on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(EcdsaSignature);

impl Signature {
    pub fn verify(&self, message: &Hash, pubkey: &PublicKey) -> bool {
        pubkey.0.verify(&message.to_bytes(), &self.0).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::InvalidKey(format!("signature is not hex: {e}")))?;
        let sig = EcdsaSignature::from_slice(&bytes)
            .map_err(|e| ChainError::InvalidKey(format!("bad signature encoding: {e}")))?;
        Ok(Signature(sig))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(D::Error::custom)
    }
}

/// Base58Check account identifier:
/// `version (0x00) || ripemd160(sha256(pubkey)) || checksum4`.
///
/// The inner string is always a validated encoding; constructing an
/// `Address` from untrusted input goes through [`Address::parse`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub(crate) fn from_payload(payload: [u8; 20]) -> Self {
        let mut versioned = Vec::with_capacity(21);
        versioned.push(ADDRESS_VERSION);
        versioned.extend_from_slice(&payload);
        Address(bs58::encode(versioned).with_check().into_string())
    }

    /// Validate an address string (alphabet, version byte, checksum).
    pub fn parse(s: &str) -> Result<Self> {
        let decoded = bs58::decode(s)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .map_err(|e| ChainError::InvalidAddress(format!("{s:.16}...: {e}")))?;
        // with_check keeps the version byte in the output
        if decoded.len() != 21 {
            return Err(ChainError::InvalidAddress(format!(
                "payload must be 20 bytes, got {}",
                decoded.len() - 1
            )));
        }
        Ok(Address(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(D::Error::custom)
    }
}

/// Canonical JSON: the UTF-8 string every node hashes for identity.
///
/// `serde_json::Map` is BTree-backed, so round-tripping through `Value`
/// yields objects with lexicographically sorted keys regardless of struct
/// field order.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .expect("BUG: canonical serialization cannot fail")
        .to_string()
}
