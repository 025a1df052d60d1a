//! # Custody Contract Surface
//!
//! `ethabi` bindings for the custody contract, plus one strongly-typed struct
//! per function produced by a single decode-and-validate step, and the
//! custody events the classifier reads from receipts.

use super::abi::{self, address_array, function};
use super::entities::LogEntry;
use super::errors::{Address, DockingError, DockingResult};
use super::value_objects::{BridgeTxType, TxCategory};
use ethabi::{Event, EventParam, Function, ParamType, RawLog, StateMutability, Token};
use primitive_types::{H256, U256};

/// Function and event bindings.
pub mod custody {
    use super::*;
    use once_cell::sync::Lazy;

    fn event(name: &str, inputs: &[(&str, ParamType, bool)]) -> Event {
        Event {
            name: name.to_string(),
            inputs: inputs
                .iter()
                .map(|(name, kind, indexed)| EventParam {
                    name: name.to_string(),
                    kind: kind.clone(),
                    indexed: *indexed,
                })
                .collect(),
            anonymous: false,
        }
    }

    fn key_view(name: &str, outputs: &[(&str, ParamType)]) -> Function {
        function(
            name,
            &[("txKey", ParamType::String)],
            outputs,
            StateMutability::View,
        )
    }

    /// `createOrSignWithdraw(string,address,uint256,bool,address)`
    pub static CREATE_OR_SIGN_WITHDRAW: Lazy<Function> = Lazy::new(|| {
        function(
            "createOrSignWithdraw",
            &[
                ("txKey", ParamType::String),
                ("to", ParamType::Address),
                ("amount", ParamType::Uint(256)),
                ("isERC20", ParamType::Bool),
                ("erc20", ParamType::Address),
            ],
            &[],
            StateMutability::NonPayable,
        )
    });

    /// `createOrSignManagerChange(string,address[],address[],uint8)`
    pub static CREATE_OR_SIGN_MANAGER_CHANGE: Lazy<Function> = Lazy::new(|| {
        function(
            "createOrSignManagerChange",
            &[
                ("txKey", ParamType::String),
                ("adds", address_array()),
                ("removes", address_array()),
                ("count", ParamType::Uint(8)),
            ],
            &[],
            StateMutability::NonPayable,
        )
    });

    /// `createOrSignUpgrade(string)`
    pub static CREATE_OR_SIGN_UPGRADE: Lazy<Function> = Lazy::new(|| {
        function(
            "createOrSignUpgrade",
            &[("txKey", ParamType::String)],
            &[],
            StateMutability::NonPayable,
        )
    });

    /// `isCompletedTx(string) returns (bool)`
    pub static IS_COMPLETED_TX: Lazy<Function> =
        Lazy::new(|| key_view("isCompletedTx", &[("completed", ParamType::Bool)]));

    /// `pendingWithdrawTx(string) returns (address,uint256,bool,address)`
    pub static PENDING_WITHDRAW_TX: Lazy<Function> = Lazy::new(|| {
        key_view(
            "pendingWithdrawTx",
            &[
                ("to", ParamType::Address),
                ("amount", ParamType::Uint(256)),
                ("isERC20", ParamType::Bool),
                ("erc20", ParamType::Address),
            ],
        )
    });

    /// `pendingManagerChangeTx(string) returns (address[],address[],uint8)`
    pub static PENDING_MANAGER_CHANGE_TX: Lazy<Function> = Lazy::new(|| {
        key_view(
            "pendingManagerChangeTx",
            &[
                ("adds", address_array()),
                ("removes", address_array()),
                ("count", ParamType::Uint(8)),
            ],
        )
    });

    /// `allManagers() returns (address[])`
    pub static ALL_MANAGERS: Lazy<Function> = Lazy::new(|| {
        function(
            "allManagers",
            &[],
            &[("managers", address_array())],
            StateMutability::View,
        )
    });

    /// ERC-20 `transfer(address,uint256)`
    pub static ERC20_TRANSFER: Lazy<Function> = Lazy::new(|| {
        function(
            "transfer",
            &[("to", ParamType::Address), ("value", ParamType::Uint(256))],
            &[("ok", ParamType::Bool)],
            StateMutability::NonPayable,
        )
    });

    /// `DepositFunds(address,uint256)`
    pub static DEPOSIT_FUNDS: Lazy<Event> = Lazy::new(|| {
        event(
            "DepositFunds",
            &[
                ("from", ParamType::Address, false),
                ("amount", ParamType::Uint(256), false),
            ],
        )
    });

    /// ERC-20 `Transfer(address indexed,address indexed,uint256)`
    pub static TRANSFER: Lazy<Event> = Lazy::new(|| {
        event(
            "Transfer",
            &[
                ("from", ParamType::Address, true),
                ("to", ParamType::Address, true),
                ("value", ParamType::Uint(256), false),
            ],
        )
    });

    fn completed(name: &str) -> Event {
        event(
            name,
            &[
                ("txKey", ParamType::String, false),
                ("signers", address_array(), false),
            ],
        )
    }

    /// `TxWithdrawCompleted(string,address[])`
    pub static TX_WITHDRAW_COMPLETED: Lazy<Event> =
        Lazy::new(|| completed("TxWithdrawCompleted"));

    /// `TxManagerChangeCompleted(string,address[])`
    pub static TX_MANAGER_CHANGE_COMPLETED: Lazy<Event> =
        Lazy::new(|| completed("TxManagerChangeCompleted"));

    /// `TxUpgradeCompleted(string,address[])`
    pub static TX_UPGRADE_COMPLETED: Lazy<Event> = Lazy::new(|| completed("TxUpgradeCompleted"));
}

/// Revert reason returned when the caller already signed the proposal.
pub const DUPLICATE_SIGNATURES: &str = "Duplicate signatures";

/// A custody-contract function with a fixed parameter layout.
pub trait ContractFunction: Sized {
    /// Binding for this function.
    fn function() -> &'static Function;

    /// Parameters as tokens.
    fn to_tokens(&self) -> Vec<Token>;

    /// Build from decoded tokens, validating cross-field rules.
    fn from_tokens(tokens: Vec<Token>) -> DockingResult<Self>;

    /// Encode selector and parameters.
    fn encode(&self) -> Vec<u8> {
        abi::encode_call(Self::function(), &self.to_tokens())
    }

    /// Decode full call-data.
    fn decode(input: &[u8]) -> DockingResult<Self> {
        Self::from_tokens(abi::decode_call(Self::function(), input)?)
    }
}

fn take_tokens<const N: usize>(tokens: Vec<Token>) -> DockingResult<[Token; N]> {
    let len = tokens.len();
    tokens
        .try_into()
        .map_err(|_| DockingError::Decode(format!("expected {} params, got {}", N, len)))
}

fn unexpected(expected: &str, got: &Token) -> DockingError {
    DockingError::Decode(format!("expected {}, got {:?}", expected, got))
}

fn as_address(token: Token) -> DockingResult<Address> {
    match token {
        Token::Address(a) => Ok(a),
        other => Err(unexpected("address", &other)),
    }
}

fn as_uint(token: Token) -> DockingResult<U256> {
    match token {
        Token::Uint(v) => Ok(v),
        other => Err(unexpected("uint", &other)),
    }
}

fn as_bool(token: Token) -> DockingResult<bool> {
    match token {
        Token::Bool(b) => Ok(b),
        other => Err(unexpected("bool", &other)),
    }
}

fn as_string(token: Token) -> DockingResult<String> {
    match token {
        Token::String(s) => Ok(s),
        other => Err(unexpected("string", &other)),
    }
}

fn as_addresses(token: Token) -> DockingResult<Vec<Address>> {
    match token {
        Token::Array(items) => items.into_iter().map(as_address).collect(),
        other => Err(unexpected("address[]", &other)),
    }
}

fn as_uint8(token: Token) -> DockingResult<u8> {
    let value = as_uint(token)?;
    if value > U256::from(u8::MAX) {
        return Err(DockingError::Decode(format!("uint8 overflow: {}", value)));
    }
    Ok(value.low_u32() as u8)
}

fn addresses_token(list: &[Address]) -> Token {
    Token::Array(list.iter().copied().map(Token::Address).collect())
}

/// `createOrSignWithdraw` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawCall {
    /// Contract key.
    pub tx_key: String,
    /// Recipient.
    pub to: Address,
    /// Amount in external decimals.
    pub amount: U256,
    /// ERC-20 contract, `None` for the native asset.
    pub erc20: Option<Address>,
}

impl ContractFunction for WithdrawCall {
    fn function() -> &'static Function {
        &*custody::CREATE_OR_SIGN_WITHDRAW
    }

    fn to_tokens(&self) -> Vec<Token> {
        vec![
            Token::String(self.tx_key.clone()),
            Token::Address(self.to),
            Token::Uint(self.amount),
            Token::Bool(self.erc20.is_some()),
            Token::Address(self.erc20.unwrap_or_default()),
        ]
    }

    fn from_tokens(tokens: Vec<Token>) -> DockingResult<Self> {
        let [key, to, amount, is_erc20, erc20] = take_tokens(tokens)?;
        let is_erc20 = as_bool(is_erc20)?;
        let erc20 = as_address(erc20)?;
        if is_erc20 == erc20.is_zero() {
            return Err(DockingError::Decode(
                "isERC20 flag disagrees with erc20 address".to_string(),
            ));
        }
        Ok(Self {
            tx_key: as_string(key)?,
            to: as_address(to)?,
            amount: as_uint(amount)?,
            erc20: is_erc20.then_some(erc20),
        })
    }
}

/// `createOrSignManagerChange` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerChangeCall {
    /// Contract key.
    pub tx_key: String,
    /// Administrators to add.
    pub adds: Vec<Address>,
    /// Administrators to remove.
    pub removes: Vec<Address>,
    /// Expected sub-action count.
    pub count: u8,
}

impl ContractFunction for ManagerChangeCall {
    fn function() -> &'static Function {
        &*custody::CREATE_OR_SIGN_MANAGER_CHANGE
    }

    fn to_tokens(&self) -> Vec<Token> {
        vec![
            Token::String(self.tx_key.clone()),
            addresses_token(&self.adds),
            addresses_token(&self.removes),
            Token::Uint(U256::from(self.count)),
        ]
    }

    fn from_tokens(tokens: Vec<Token>) -> DockingResult<Self> {
        let [key, adds, removes, count] = take_tokens(tokens)?;
        Ok(Self {
            tx_key: as_string(key)?,
            adds: as_addresses(adds)?,
            removes: as_addresses(removes)?,
            count: as_uint8(count)?,
        })
    }
}

/// `createOrSignUpgrade` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeCall {
    /// Contract key.
    pub tx_key: String,
}

impl ContractFunction for UpgradeCall {
    fn function() -> &'static Function {
        &*custody::CREATE_OR_SIGN_UPGRADE
    }

    fn to_tokens(&self) -> Vec<Token> {
        vec![Token::String(self.tx_key.clone())]
    }

    fn from_tokens(tokens: Vec<Token>) -> DockingResult<Self> {
        let [key] = take_tokens(tokens)?;
        Ok(Self {
            tx_key: as_string(key)?,
        })
    }
}

/// Any decoded custody broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CustodyCall {
    /// Withdrawal co-sign.
    Withdraw(WithdrawCall),
    /// Administrator-change co-sign.
    ManagerChange(ManagerChangeCall),
    /// Upgrade co-sign.
    Upgrade(UpgradeCall),
}

impl CustodyCall {
    /// Category from the leading selector alone; `None` if too short or unknown.
    pub fn category(input: &[u8]) -> Option<TxCategory> {
        if abi::has_selector(WithdrawCall::function(), input) {
            Some(TxCategory::BroadcastWithdraw)
        } else if abi::has_selector(ManagerChangeCall::function(), input) {
            Some(TxCategory::BroadcastManagerChange)
        } else if abi::has_selector(UpgradeCall::function(), input) {
            Some(TxCategory::BroadcastUpgrade)
        } else {
            None
        }
    }

    /// Decode a broadcast whose selector is known.
    pub fn decode(input: &[u8]) -> DockingResult<Self> {
        match Self::category(input) {
            Some(TxCategory::BroadcastWithdraw) => WithdrawCall::decode(input).map(Self::Withdraw),
            Some(TxCategory::BroadcastManagerChange) => {
                ManagerChangeCall::decode(input).map(Self::ManagerChange)
            }
            Some(TxCategory::BroadcastUpgrade) => UpgradeCall::decode(input).map(Self::Upgrade),
            _ => Err(DockingError::Decode("unknown custody selector".to_string())),
        }
    }

    /// Contract key.
    pub fn tx_key(&self) -> &str {
        match self {
            Self::Withdraw(c) => &c.tx_key,
            Self::ManagerChange(c) => &c.tx_key,
            Self::Upgrade(c) => &c.tx_key,
        }
    }

    /// Encoded call-data.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Withdraw(c) => c.encode(),
            Self::ManagerChange(c) => c.encode(),
            Self::Upgrade(c) => c.encode(),
        }
    }
}

/// Encode a single-string view call (`isCompletedTx`, `pending*Tx`).
pub fn encode_key_view(view: &Function, tx_key: &str) -> Vec<u8> {
    abi::encode_call(view, &[Token::String(tx_key.to_string())])
}

/// Key argument of a single-string view call.
pub fn decode_key_view(view: &Function, input: &[u8]) -> DockingResult<String> {
    let [key] = take_tokens(abi::decode_call(view, input)?)?;
    as_string(key)
}

/// Encode `allManagers()`.
pub fn encode_all_managers() -> Vec<u8> {
    abi::encode_call(&custody::ALL_MANAGERS, &[])
}

/// Decode an `isCompletedTx` return value.
pub fn decode_bool_return(data: &[u8]) -> DockingResult<bool> {
    let [flag] = take_tokens(custody::IS_COMPLETED_TX.decode_output(data)?)?;
    as_bool(flag)
}

/// Encode an `isCompletedTx` return value.
pub fn encode_bool_return(flag: bool) -> Vec<u8> {
    ethabi::encode(&[Token::Bool(flag)])
}

/// Decode an `allManagers` return value.
pub fn decode_managers_return(data: &[u8]) -> DockingResult<Vec<Address>> {
    let [list] = take_tokens(custody::ALL_MANAGERS.decode_output(data)?)?;
    as_addresses(list)
}

/// Encode an `allManagers` return value.
pub fn encode_managers_return(managers: &[Address]) -> Vec<u8> {
    ethabi::encode(&[addresses_token(managers)])
}

/// Encode an ERC-20 `transfer` call.
pub fn encode_erc20_transfer(to: Address, value: U256) -> Vec<u8> {
    abi::encode_call(
        &custody::ERC20_TRANSFER,
        &[Token::Address(to), Token::Uint(value)],
    )
}

/// Pending withdrawal proposal as stored on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingWithdraw {
    /// Recipient.
    pub to: Address,
    /// Amount.
    pub amount: U256,
    /// ERC-20 contract, `None` for native.
    pub erc20: Option<Address>,
}

impl PendingWithdraw {
    /// Decode a `pendingWithdrawTx` return; `None` when no proposal exists.
    pub fn decode_return(data: &[u8]) -> DockingResult<Option<Self>> {
        let [to, amount, is_erc20, erc20] =
            take_tokens(custody::PENDING_WITHDRAW_TX.decode_output(data)?)?;
        let to = as_address(to)?;
        if to.is_zero() {
            return Ok(None);
        }
        let is_erc20 = as_bool(is_erc20)?;
        let erc20 = as_address(erc20)?;
        Ok(Some(Self {
            to,
            amount: as_uint(amount)?,
            erc20: (is_erc20 && !erc20.is_zero()).then_some(erc20),
        }))
    }

    /// Encode as a view return value.
    pub fn encode_return(proposal: Option<&Self>) -> Vec<u8> {
        let (to, amount, erc20) = proposal
            .map(|p| (p.to, p.amount, p.erc20))
            .unwrap_or((Address::zero(), U256::zero(), None));
        ethabi::encode(&[
            Token::Address(to),
            Token::Uint(amount),
            Token::Bool(erc20.is_some()),
            Token::Address(erc20.unwrap_or_default()),
        ])
    }
}

/// Pending administrator-change proposal as stored on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingManagerChange {
    /// Administrators to add.
    pub adds: Vec<Address>,
    /// Administrators to remove.
    pub removes: Vec<Address>,
    /// Expected sub-action count.
    pub count: u8,
}

impl PendingManagerChange {
    /// Decode a `pendingManagerChangeTx` return; `None` when no proposal exists.
    pub fn decode_return(data: &[u8]) -> DockingResult<Option<Self>> {
        let [adds, removes, count] =
            take_tokens(custody::PENDING_MANAGER_CHANGE_TX.decode_output(data)?)?;
        let count = as_uint8(count)?;
        if count == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            adds: as_addresses(adds)?,
            removes: as_addresses(removes)?,
            count,
        }))
    }

    /// Encode as a view return value.
    pub fn encode_return(proposal: Option<&Self>) -> Vec<u8> {
        let (adds, removes, count) = proposal
            .map(|p| (p.adds.clone(), p.removes.clone(), p.count))
            .unwrap_or_default();
        ethabi::encode(&[
            addresses_token(&adds),
            addresses_token(&removes),
            Token::Uint(U256::from(count)),
        ])
    }
}

/// Custody-relevant event decoded from a receipt log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CustodyEvent {
    /// Native deposit into the custody contract.
    DepositFunds {
        /// Depositor.
        from: Address,
        /// Amount.
        amount: U256,
    },
    /// ERC-20 transfer.
    Transfer {
        /// Sender.
        from: Address,
        /// Recipient.
        to: Address,
        /// Amount.
        value: U256,
    },
    /// Multisig completed for a contract key.
    Completed {
        /// Which action completed.
        tx_type: BridgeTxType,
        /// Contract key.
        tx_key: String,
        /// Administrators whose signatures completed it.
        signers: Vec<Address>,
    },
}

fn address_topic(address: &Address) -> H256 {
    H256::from_slice(&ethabi::encode(&[Token::Address(*address)]))
}

fn parse_log(event: &Event, log: &LogEntry) -> DockingResult<Vec<Token>> {
    let parsed = event.parse_log(RawLog {
        topics: log.topics.clone(),
        data: log.data.clone(),
    })?;
    Ok(parsed.params.into_iter().map(|p| p.value).collect())
}

fn completed_event(tx_type: BridgeTxType) -> &'static Event {
    match tx_type {
        BridgeTxType::ManagerChange | BridgeTxType::Recovery => {
            &*custody::TX_MANAGER_CHANGE_COMPLETED
        }
        BridgeTxType::Upgrade => &*custody::TX_UPGRADE_COMPLETED,
        _ => &*custody::TX_WITHDRAW_COMPLETED,
    }
}

impl CustodyEvent {
    /// Decode a log entry. `Ok(None)` for unrelated events.
    pub fn decode(log: &LogEntry) -> DockingResult<Option<Self>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };

        if *topic0 == custody::DEPOSIT_FUNDS.signature() {
            let [from, amount] = take_tokens(parse_log(&custody::DEPOSIT_FUNDS, log)?)?;
            return Ok(Some(Self::DepositFunds {
                from: as_address(from)?,
                amount: as_uint(amount)?,
            }));
        }

        if *topic0 == custody::TRANSFER.signature() {
            let [from, to, value] = take_tokens(parse_log(&custody::TRANSFER, log)?)?;
            return Ok(Some(Self::Transfer {
                from: as_address(from)?,
                to: as_address(to)?,
                value: as_uint(value)?,
            }));
        }

        let tx_type = [
            BridgeTxType::Withdraw,
            BridgeTxType::ManagerChange,
            BridgeTxType::Upgrade,
        ]
        .into_iter()
        .find(|t| *topic0 == completed_event(*t).signature());
        let Some(tx_type) = tx_type else {
            return Ok(None);
        };
        let [key, signers] = take_tokens(parse_log(completed_event(tx_type), log)?)?;
        Ok(Some(Self::Completed {
            tx_type,
            tx_key: as_string(key)?,
            signers: as_addresses(signers)?,
        }))
    }

    /// Encode as a log entry emitted by `address`.
    pub fn to_log(&self, address: Address) -> LogEntry {
        let (topics, data) = match self {
            Self::DepositFunds { from, amount } => (
                vec![custody::DEPOSIT_FUNDS.signature()],
                ethabi::encode(&[Token::Address(*from), Token::Uint(*amount)]),
            ),
            Self::Transfer { from, to, value } => (
                vec![
                    custody::TRANSFER.signature(),
                    address_topic(from),
                    address_topic(to),
                ],
                ethabi::encode(&[Token::Uint(*value)]),
            ),
            Self::Completed {
                tx_type,
                tx_key,
                signers,
            } => (
                vec![completed_event(*tx_type).signature()],
                ethabi::encode(&[Token::String(tx_key.clone()), addresses_token(signers)]),
            ),
        };
        LogEntry {
            address,
            topics,
            data,
        }
    }
}
