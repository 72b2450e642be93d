//! Where this node keeps its state on disk.

use std::env;
use std::path::PathBuf;

const NODE_STORE_ENV: &str = "NODE_STORE";
const DEFAULT_NODE_STORE: &str = "./.simple_blockchain/";

/// The node's store directory: `$NODE_STORE`, or `./.simple_blockchain/`
/// if unset.
pub fn node_store_dir() -> PathBuf {
    PathBuf::from(env::var(NODE_STORE_ENV).unwrap_or_else(|_| DEFAULT_NODE_STORE.to_string()))
}

/// `<NODE_STORE>/db`, the directory `Chain::load` keeps `blockchain.db` in.
pub fn db_dir(node_store: &std::path::Path) -> PathBuf {
    node_store.join("db")
}

/// `<NODE_STORE>/wallet.dat`.
pub fn wallet_path(node_store: &std::path::Path) -> PathBuf {
    node_store.join("wallet.dat")
}
