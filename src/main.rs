use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hex::FromHex;
use simple_blockchain::config;
use simple_blockchain::crypto::PublicKey;
use simple_blockchain::node::Node;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "simple-blockchain", about = "A single-node permissioned toy blockchain")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the node's store directory and a first wallet keypair if none exists.
    Init,
    /// Print the current chain height and mempool size.
    Status,
    /// Mine a single block against the current mempool and exit.
    MineOnce {
        /// Wallet key id to receive the block reward. Defaults to the first key.
        #[arg(long)]
        key: Option<u32>,
    },
    /// Print an account's balance.
    Balance {
        /// Wallet key id to look up. Defaults to the first key.
        #[arg(long)]
        key: Option<u32>,
    },
    /// Generate a new keypair in the local wallet.
    NewKey,
    /// Sign and submit a transfer to the mempool.
    Send {
        /// Wallet key id of the sender. Defaults to the first key.
        #[arg(long)]
        from: Option<u32>,
        /// Recipient public key, as hex of the 65-byte uncompressed SEC1 encoding.
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        #[arg(long, default_value_t = 0)]
        fee: u64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let node_store = config::node_store_dir();
    let node = Node::open(&node_store)?;

    match cli.command {
        Command::Init => {
            let (id, pk) = node.wallet_default_keypair()?;
            println!("node store ready at {:?}", node_store);
            println!("default key id {id}: {}", hex::encode(pk.to_bytes()));
        }
        Command::Status => {
            println!("height: {}", node.height());
            println!("mempool: {} pending", node.mempool_len());
        }
        Command::MineOnce { key } => {
            let key_id = match key {
                Some(id) => id,
                None => node.wallet_default_keypair()?.0,
            };
            let cancel = Arc::new(AtomicBool::new(false));
            let block = node.mine_once(key_id, &cancel)?;
            println!(
                "mined block at height {} with {} transaction(s)",
                node.height(),
                block.body.len()
            );
        }
        Command::Balance { key } => {
            let (key_id, pk) = match key {
                Some(id) => (id, node.wallet_public_key(id)?),
                None => node.wallet_default_keypair()?,
            };
            println!("key {key_id}: {}", node.balance(&pk));
        }
        Command::NewKey => {
            let id = node.wallet_generate_keypair()?;
            let pk = node.wallet_public_key(id)?;
            println!("generated key id {id}: {}", hex::encode(pk.to_bytes()));
        }
        Command::Send { from, to, amount, fee } => {
            let from_id = match from {
                Some(id) => id,
                None => node.wallet_default_keypair()?.0,
            };
            let to_bytes = <[u8; 65]>::from_hex(&to)?;
            let to_pk = PublicKey::from_bytes(to_bytes)?;
            node.send(from_id, to_pk, amount, fee)?;
            println!("submitted transfer of {amount} (fee {fee}) to mempool");
        }
    }

    Ok(())
}
