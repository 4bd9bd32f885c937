//! Network constants. Configurable at genesis, immutable after (spec §6).
//!
//! All monetary values are in satoshi (1 CCO2 = 10^8 satoshi).

pub const COIN: u64 = 100_000_000;

/// Maximum money supply: 21M CCO2.
pub const MAX_MONEY: u64 = 21_000_000 * COIN;

pub const INITIAL_REWARD: u64 = 50 * COIN;
pub const HALVING_INTERVAL: u64 = 210_000;
/// Halvings after which the subsidy is defined to be zero (64 * 210_000 = 13,440,000).
pub const MAX_HALVINGS: u64 = 64;

pub const TARGET_BLOCK_TIME_SECS: u32 = 600;
/// Height interval between PoW retargets.
pub const RETARGET_INTERVAL: u64 = 2016;
/// Expected seconds for a full retarget interval at target pace.
pub const RETARGET_TIMESPAN_SECS: u32 = TARGET_BLOCK_TIME_SECS * RETARGET_INTERVAL as u32;
/// Retarget clamp: the new target may move at most 4x in either direction.
pub const MAX_RETARGET_FACTOR: u32 = 4;

/// Number of past block timestamps used for the median-time-past rule.
pub const MEDIAN_TIME_SPAN: usize = 11;
/// Loose clock-skew allowance: a header's timestamp must not exceed `now + 2h`.
pub const MAX_FUTURE_BLOCK_TIME_SECS: u32 = 2 * 60 * 60;

pub const MAX_BLOCK_BYTES: usize = 4 * 1024 * 1024;
/// Soft cap on transaction count per block (spec §3: "≤ ~2000").
pub const MAX_BLOCK_TX_COUNT: usize = 2_000;
pub const MAX_TX_BYTES: usize = 400_000;
pub const MAX_INPUTS: usize = 2_000;
pub const MAX_OUTPUTS: usize = 2_000;

pub const MIN_RELAY_FEE_RATE_SAT_PER_BYTE: u64 = 1;
pub const MIN_ABSOLUTE_TX_FEE: u64 = 1000;

pub const MEMPOOL_MAX_TX_COUNT: usize = 10_000;
pub const MEMPOOL_MAX_BYTES: usize = 300 * 1024 * 1024;

/// Number of confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u64 = 100;

pub const ORPHAN_POOL_MAX_ENTRIES: usize = 1_000;
pub const ORPHAN_POOL_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Known-good `(height, block hash)` pairs pinned into the binary to bound
/// how deep a reorg can unwind history. Empty until this chain has run long
/// enough to accumulate settled history worth pinning.
pub const CHECKPOINTS: &[(u32, [u8; 32])] = &[];

pub const DEFAULT_P2P_PORT: u16 = 28333;
pub const DEFAULT_RPC_PORT: u16 = 28332;

/// Base58Check version byte prefixed to address payloads on mainnet.
pub const ADDRESS_VERSION_BYTE: u8 = 0x1C;

/// Canonical burn address payload (20 zero bytes — an unspendable pubkey hash).
pub const BURN_PUBKEY_HASH: [u8; 20] = [0u8; 20];

/// Proof-of-work hash function selectable at genesis; immutable per chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PowAlgorithm {
    /// Scrypt(N=1024, r=1, p=1) — the default network PoW hash.
    Scrypt,
    /// Argon2id(m=64 MiB, t=3, p=4) — opt-in at genesis.
    Argon2id,
}

pub const DEFAULT_POW_ALGORITHM: PowAlgorithm = PowAlgorithm::Scrypt;
