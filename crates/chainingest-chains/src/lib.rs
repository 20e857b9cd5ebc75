//! chainingest-chains — one [`ChainBlockRepository`] per chain family.
//!
//! | Family | Repository | Dialect |
//! |--------|------------|---------|
//! | EVM    | [`EvmBlockRepository`] | `eth_getBlockByNumber`, `eth_getLogs`, `eth_getTransactionReceipt` |
//! | Solana | [`SolanaBlockRepository`] | `getSlot`, `getBlock`, `getSignaturesForAddress`, `getTransaction` |
//! | Near   | [`NearBlockRepository`] | `block`, `chunk`, `EXPERIMENTAL_tx_status` |
//!
//! Each repository serves every chain registered in its [`ChainRegistry`],
//! talking to that chain's transport (normally a provider pool).
//!
//! [`ChainBlockRepository`]: chainingest_core::ChainBlockRepository

pub mod evm;
pub mod near;
pub mod registry;
pub mod solana;

mod rpc;
#[cfg(test)]
mod testing;

pub use evm::EvmBlockRepository;
pub use near::NearBlockRepository;
pub use registry::{ChainRegistry, ChainSettings};
pub use solana::SolanaBlockRepository;
