use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use vless_reality::utils::crypto::{
    decode_private_key, encode_key, generate_reality_keypair, generate_short_id, public_key_for,
    RealityKeyPair,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reality 密钥与客户端 ID 生成工具", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 生成 X25519 密钥对 (base64url, Xray 格式)
    RealityKeys {
        /// 由已有私钥推导公钥，而不是生成新密钥
        #[arg(short = 'i', long)]
        private_key: Option<String>,
    },
    /// 生成客户端 UUID
    Uuid {
        /// 生成数量
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
    /// 生成 8 字节 short id
    ShortId {
        #[arg(short, long, default_value_t = 1)]
        count: usize,
    },
}

fn main() -> Result<()> {
    match Args::parse().command {
        Command::RealityKeys { private_key } => {
            let keypair = match private_key {
                Some(key) => {
                    let private_key = decode_private_key(&key)?;
                    RealityKeyPair {
                        private_key,
                        public_key: public_key_for(&private_key),
                    }
                }
                None => generate_reality_keypair(),
            };
            let private_b64 = encode_key(&keypair.private_key);
            let public_b64 = encode_key(&keypair.public_key);

            println!("Private key: {}", private_b64);
            println!("Public key:  {}", public_b64);
            println!();
            println!(
                "Server (config.json):  \"realitySettings\": {{ \"privateKey\": \"{}\" }}",
                private_b64
            );
            println!(
                "Client:                \"realitySettings\": {{ \"publicKey\": \"{}\" }}",
                public_b64
            );
            println!();
            println!("Note: Keep the private key secure and do not share it!");
        }
        Command::Uuid { count } => {
            for _ in 0..count {
                println!("{}", Uuid::new_v4());
            }
        }
        Command::ShortId { count } => {
            for _ in 0..count {
                println!("{}", generate_short_id());
            }
        }
    }

    Ok(())
}
