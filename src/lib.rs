pub mod core;
pub mod crypto;
pub mod regtest;
pub mod snapshot;
pub mod stats;
pub mod storage;
