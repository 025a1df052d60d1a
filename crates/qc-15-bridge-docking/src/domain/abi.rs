//! # ABI Helpers
//!
//! Call-data framing and revert-data handling on top of `ethabi`. The
//! parameter codec itself is `ethabi::encode`/`ethabi::decode`; this module
//! only adds selector checks and the crate's error mapping.

use super::errors::{DockingError, DockingResult};
use ethabi::{Function, Param, ParamType, StateMutability, Token};
use once_cell::sync::Lazy;
use primitive_types::H256;
use sha3::{Digest, Keccak256};

/// Length of a function selector.
pub const SELECTOR_LEN: usize = 4;

/// Solidity's `Error(string)` revert payload.
pub static ERROR_STRING: Lazy<Function> = Lazy::new(|| {
    function(
        "Error",
        &[("reason", ParamType::String)],
        &[],
        StateMutability::Pure,
    )
});

impl From<ethabi::Error> for DockingError {
    fn from(e: ethabi::Error) -> Self {
        DockingError::Decode(e.to_string())
    }
}

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

fn params(list: &[(&str, ParamType)]) -> Vec<Param> {
    list.iter()
        .map(|(name, kind)| Param {
            name: name.to_string(),
            kind: kind.clone(),
            internal_type: None,
        })
        .collect()
}

/// Build a function binding from named inputs and outputs.
#[allow(deprecated)]
pub fn function(
    name: &str,
    inputs: &[(&str, ParamType)],
    outputs: &[(&str, ParamType)],
    state_mutability: StateMutability,
) -> Function {
    Function {
        name: name.to_string(),
        inputs: params(inputs),
        outputs: params(outputs),
        constant: None,
        state_mutability,
    }
}

/// `address[]`
pub fn address_array() -> ParamType {
    ParamType::Array(Box::new(ParamType::Address))
}

/// Selector followed by encoded parameters.
///
/// Callers pass tokens built from typed structs, so the layout always
/// matches `function.inputs`.
pub fn encode_call(function: &Function, tokens: &[Token]) -> Vec<u8> {
    let mut out = function.short_signature().to_vec();
    out.extend(ethabi::encode(tokens));
    out
}

/// Check the selector and decode the parameters of `function`.
pub fn decode_call(function: &Function, input: &[u8]) -> DockingResult<Vec<Token>> {
    let Some(head) = input.get(..SELECTOR_LEN) else {
        return Err(DockingError::Decode("call-data shorter than selector".to_string()));
    };
    if head != function.short_signature() {
        return Err(DockingError::Decode(format!(
            "selector 0x{} does not match {}",
            hex::encode(head),
            function.name
        )));
    }
    Ok(function.decode_input(&input[SELECTOR_LEN..])?)
}

/// Whether `input` starts with the selector of `function`.
pub fn has_selector(function: &Function, input: &[u8]) -> bool {
    input.get(..SELECTOR_LEN) == Some(&function.short_signature()[..])
}

/// Decode a revert reason from `Error(string)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    decode_call(&ERROR_STRING, data)
        .ok()
        .and_then(|tokens| tokens.into_iter().next())
        .and_then(Token::into_string)
}

/// Encode `Error(string)` revert data.
pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    encode_call(&ERROR_STRING, &[Token::String(reason.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_selector() {
        assert_eq!(ERROR_STRING.short_signature(), [0x08, 0xc3, 0x79, 0xa0]);
    }

    #[test]
    fn test_known_function_selector() {
        let transfer = function(
            "transfer",
            &[("to", ParamType::Address), ("value", ParamType::Uint(256))],
            &[("ok", ParamType::Bool)],
            StateMutability::NonPayable,
        );
        assert_eq!(transfer.short_signature(), [0xa9, 0x05, 0x9c, 0xbb]);
        assert!(has_selector(&transfer, &[0xa9, 0x05, 0x9c, 0xbb, 0x00]));
        assert!(!has_selector(&transfer, &[0xa9, 0x05]));
    }

    #[test]
    fn test_decode_call_short_input() {
        assert!(decode_call(&ERROR_STRING, &[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_decode_call_wrong_selector() {
        let err = decode_call(&ERROR_STRING, &[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(err.to_string().contains("0xdeadbeef"));
    }

    #[test]
    fn test_revert_reason() {
        let data = encode_revert_reason("Duplicate signatures");
        assert_eq!(decode_revert_reason(&data).as_deref(), Some("Duplicate signatures"));
        assert_eq!(decode_revert_reason(&[0u8; 3]), None);
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            hex::encode(keccak256(&[]).as_bytes()),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
