//! Calldata encoding and return-data decoding for the handful of view
//! functions the engine calls.

use crate::error::RpcError;
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Address, Bytes, H256, U256};
use ethers_core::utils::{id, keccak256};

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const EIP1967_IMPLEMENTATION_SLOT: &str =
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

pub const BALANCE_OF: &str = "balanceOf(address)";
pub const DECIMALS: &str = "decimals()";
pub const NAME: &str = "name()";
pub const SYMBOL: &str = "symbol()";
pub const GET_DATA: &str = "getData(bytes32)";
pub const FOLLOWER_COUNT: &str = "followerCount(address)";
pub const FOLLOWING_COUNT: &str = "followingCount(address)";
pub const IS_FOLLOWING: &str = "isFollowing(address,address)";

pub fn implementation_slot() -> H256 {
    let mut bytes = [0u8; 32];
    // Constant is valid hex of the right length.
    if let Ok(decoded) = hex::decode(EIP1967_IMPLEMENTATION_SLOT) {
        bytes.copy_from_slice(&decoded);
    }
    H256::from(bytes)
}

/// ERC725Y data key for token metadata: `keccak256(name)`.
pub fn data_key(name: &str) -> H256 {
    H256::from(keccak256(name.as_bytes()))
}

pub fn token_name_key() -> H256 {
    data_key("LSP4TokenName")
}

pub fn token_symbol_key() -> H256 {
    data_key("LSP4TokenSymbol")
}

/// Four-byte selector for a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

pub fn call_data(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

pub fn balance_of(owner: Address) -> Bytes {
    call_data(BALANCE_OF, &[Token::Address(owner)])
}

pub fn get_data(key: H256) -> Bytes {
    call_data(GET_DATA, &[Token::FixedBytes(key.as_bytes().to_vec())])
}

fn decode_single(kind: ParamType, data: &[u8]) -> Result<Token, RpcError> {
    if data.is_empty() {
        return Err(RpcError::Decode("empty return data".into()));
    }
    abi::decode(&[kind], data)
        .map_err(|e| RpcError::Decode(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| RpcError::Decode("missing return value".into()))
}

pub fn decode_uint(data: &[u8]) -> Result<U256, RpcError> {
    decode_single(ParamType::Uint(256), data)?
        .into_uint()
        .ok_or_else(|| RpcError::Decode("expected uint256".into()))
}

pub fn decode_bool(data: &[u8]) -> Result<bool, RpcError> {
    decode_single(ParamType::Bool, data)?
        .into_bool()
        .ok_or_else(|| RpcError::Decode("expected bool".into()))
}

pub fn decode_bytes(data: &[u8]) -> Result<Vec<u8>, RpcError> {
    decode_single(ParamType::Bytes, data)?
        .into_bytes()
        .ok_or_else(|| RpcError::Decode("expected bytes".into()))
}

/// Decode a `string` return value, accepting the `bytes32` encoding some
/// early token contracts used for `name()`/`symbol()`.
pub fn decode_string(data: &[u8]) -> Result<String, RpcError> {
    if let Ok(token) = decode_single(ParamType::String, data)
        && let Some(s) = token.into_string()
    {
        return Ok(s);
    }
    if data.len() == 32 {
        let end = data.iter().position(|b| *b == 0).unwrap_or(32);
        return String::from_utf8(data[..end].to_vec())
            .map_err(|e| RpcError::Decode(e.to_string()));
    }
    Err(RpcError::Decode("expected string".into()))
}

/// `decimals()` returns a uint8; anything larger is garbage.
pub fn decode_decimals(data: &[u8]) -> Result<u8, RpcError> {
    let value = decode_uint(data)?;
    if value > U256::from(u8::MAX) {
        return Err(RpcError::Decode(format!("decimals out of range: {value}")));
    }
    Ok(value.low_u32() as u8)
}

/// An address stored in a 32-byte word (right-aligned). Zero means unset.
pub fn address_from_word(word: H256) -> Option<Address> {
    let address = Address::from_slice(&word.as_bytes()[12..]);
    if address.is_zero() { None } else { Some(address) }
}

pub fn address_to_word(address: Address) -> H256 {
    let mut bytes = [0u8; 32];
    bytes[12..].copy_from_slice(address.as_bytes());
    H256::from(bytes)
}
