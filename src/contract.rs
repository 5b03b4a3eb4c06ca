// src/contract.rs
//
// Central switch for caller contract checks (shapes, indices, ranges).
// Enforced in debug builds or with the `strict-contracts` feature,
// compiled out otherwise. Storage access stays memory-safe either way.

/// True when contract checks are enforced in this build.
pub const CONTRACTS_ENABLED: bool = cfg!(any(debug_assertions, feature = "strict-contracts"));

/// Panic with the given message if `cond` is false and contracts are enabled.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {
        if $crate::contract::CONTRACTS_ENABLED && !($cond) {
            panic!($($arg)+);
        }
    };
}
