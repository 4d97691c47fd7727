pub mod deposit;
pub mod domain;
pub mod ports;
pub mod provider;
pub mod rpc;
pub mod state_machine;
pub mod transport;
pub mod wire;

pub use deposit::{DepositController, PRE_DEPOSIT_BALANCE_KEY};
pub use domain::{
    parse_base_units, BalanceSnapshot, ChannelIdentity, ConnextTransaction, DepositOutcome,
    FlowStage, PreDepositBalance, TimestampMs,
};
pub use ports::{
    AuthPort, BlockNotifier, ChainPort, ChannelPort, ChannelRpc, ClockPort, FrameTransport,
    KeyValueStore, PortError, UiPort,
};
pub use provider::{ChannelProvider, ProviderBackend, ProviderKind};
pub use rpc::{
    EventListener, LifecycleListener, PendingCall, RpcConnection, DEFAULT_CLOSE_TIMEOUT_MS,
};
pub use state_machine::{deposit_transition, DepositAction, DepositState, StateTransition};
pub use transport::{origin_of, MessageHandler, OriginGate};
pub use wire::{decode_inbound, methods, Inbound, JsonRpcRequest, ResponseBody};
