//! # hubsync CLI
//!
//! Command-line utilities for building and inspecting sync keys.

use anyhow::{Context, Result};
use hubsync_core::time::{from_network_time, network_time_now, to_network_time};
use hubsync_core::{MessageType, TsHash};
use hubsync_trie::SyncId;
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "sync-id" => {
            if args.len() < 6 {
                eprintln!("Usage: hubsync sync-id <timestamp> <fid> <message-type> <hash-hex>");
                std::process::exit(1);
            }
            println!("{}", sync_id(&args[2], &args[3], &args[4], &args[5])?);
        }
        "decode-sync-id" => {
            if args.len() < 3 {
                eprintln!("Usage: hubsync decode-sync-id <sync-id-hex>");
                std::process::exit(1);
            }
            println!("{}", decode_sync_id(&args[2])?);
        }
        "ts-hash" => {
            if args.len() < 4 {
                eprintln!("Usage: hubsync ts-hash <timestamp> <hash-hex>");
                std::process::exit(1);
            }
            println!("{}", ts_hash(&args[2], &args[3])?);
        }
        "network-time" => {
            println!("{}", network_time(args.get(2).map(String::as_str))?);
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_hash(hash: &str) -> Result<Vec<u8>> {
    hex::decode(hash).context("Hash must be hex")
}

fn sync_id(timestamp: &str, fid: &str, message_type: &str, hash: &str) -> Result<String> {
    let timestamp: u32 = timestamp.parse().context("Invalid timestamp")?;
    let fid: u64 = fid.parse().context("Invalid fid")?;
    let message_type: u8 = message_type.parse().context("Invalid message type")?;
    let message_type = MessageType::try_from(message_type)?;
    let id = SyncId::from_parts(timestamp, fid, message_type, &parse_hash(hash)?)?;
    Ok(id.to_string())
}

fn decode_sync_id(encoded: &str) -> Result<String> {
    let bytes = hex::decode(encoded).context("Sync id must be hex")?;
    let id = SyncId::from_bytes(&bytes)?;
    let decoded = serde_json::json!({
        "timestamp": id.timestamp(),
        "unix_ms": from_network_time(id.timestamp()),
        "fid": id.fid(),
        "message_type": format!("{:?}", id.message_type()?),
        "hash": hex::encode(id.hash()),
    });
    Ok(serde_json::to_string_pretty(&decoded)?)
}

fn ts_hash(timestamp: &str, hash: &str) -> Result<String> {
    let timestamp: u32 = timestamp.parse().context("Invalid timestamp")?;
    let ts_hash = TsHash::new(timestamp, &parse_hash(hash)?)?;
    Ok(hex::encode(ts_hash.as_bytes()))
}

fn network_time(unix_ms: Option<&str>) -> Result<u32> {
    match unix_ms {
        Some(ms) => {
            let ms: i64 = ms.parse().context("Invalid UNIX milliseconds")?;
            Ok(to_network_time(ms)?)
        }
        None => Ok(network_time_now()?),
    }
}

fn print_help() {
    println!(
        r#"hubsync CLI

USAGE:
    hubsync <COMMAND> [OPTIONS]

COMMANDS:
    sync-id <ts> <fid> <type> <hash>  Build a sync id (message type as its wire number)
    decode-sync-id <hex>              Decode a sync id into its parts
    ts-hash <ts> <hash>               Build the timestamp-hash ordering key
    network-time [unix-ms]            Print network time, now or for a UNIX instant
    help                              Show this help message

EXAMPLES:
    hubsync sync-id 73000000 42 1 aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa
    hubsync network-time 1640995200000
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn sync_id_roundtrips_through_decode() {
        let id = sync_id("73000000", "42", "1", HASH).unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&decode_sync_id(&id).unwrap()).unwrap();
        assert_eq!(decoded["timestamp"], 73_000_000);
        assert_eq!(decoded["fid"], 42);
        assert_eq!(decoded["message_type"], "CastAdd");
        assert_eq!(decoded["hash"], HASH);
    }

    #[test]
    fn ts_hash_is_big_endian_timestamp_then_hash() {
        let encoded = ts_hash("1", HASH).unwrap();
        assert_eq!(encoded, format!("00000001{HASH}"));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(sync_id("1", "1", "99", HASH).is_err());
        assert!(ts_hash("1", "abcd").is_err());
        assert!(decode_sync_id("zz").is_err());
    }

    #[test]
    fn network_time_counts_from_2021() {
        assert_eq!(network_time(Some("1609459200000")).unwrap(), 0);
        assert_eq!(network_time(Some("1640995200000")).unwrap(), 31_536_000);
        assert!(network_time(Some("0")).is_err());
    }
}
