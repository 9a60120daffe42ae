//! Chain reads with batching, retry and failure isolation.

mod reader;

pub use reader::{
    AccountBatch, AccountSlot, ChainReader, MAX_MULTIPLE_ACCOUNTS, ReaderConfig, ReaderStats,
    with_deadline,
};
