//! `--gen` 一次性命令：生成一份新的客户端配置 (.rai) 并退出。

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::proxy::client_config::{ClientConfig, ClientServerConfig, CryptoSettings};

fn print_usage() {
    println!();
    println!("生成客户端配置文件的用法:");
    println!("1. 使用默认配置 (localhost:8840):");
    println!("   relayapi-server --gen");
    println!();
    println!("2. 指定主机和端口:");
    println!("   relayapi-server --gen example.com:8080");
    println!();
    println!("3. 只指定主机 (使用默认端口 8840):");
    println!("   relayapi-server --gen example.com");
    println!();
    println!("4. 查看此帮助信息:");
    println!("   relayapi-server --gen help");
    println!();
    println!("提示: 使用重定向保存配置到文件:");
    println!("   relayapi-server --gen > config.rai");
    println!();
}

/// 生成一份带新鲜随机密钥的客户端配置
pub fn generate_client_config(host: &str, port: u16) -> ClientConfig {
    let mut key = [0u8; 32];
    rand::thread_rng().fill(&mut key);
    let iv_seed: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    let host = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };

    ClientConfig {
        version: "1.0.0".to_string(),
        server: ClientServerConfig {
            host,
            port,
            base_path: "/relayapi/".to_string(),
        },
        crypto: CryptoSettings::Aes {
            aes_key: hex::encode(key),
            aes_iv_seed: iv_seed,
        },
    }
}

/// 处理 --gen 参数：打印配置或帮助信息后直接退出进程
pub fn run(gen_arg: &str) -> ! {
    if matches!(gen_arg, "help" | "-h" | "--help") {
        print_usage();
        std::process::exit(0);
    }

    let mut host = "localhost".to_string();
    let mut port = 8840u16;

    if !gen_arg.is_empty() {
        let mut parts = gen_arg.splitn(2, ':');
        if let Some(h) = parts.next() {
            if !h.is_empty() {
                host = h.to_string();
            }
        }
        if let Some(p) = parts.next() {
            match p.parse::<u16>() {
                Ok(parsed) => port = parsed,
                Err(e) => {
                    eprintln!("错误: 无效的端口号: {}", e);
                    eprintln!();
                    eprintln!("使用 --gen help 查看使用说明");
                    std::process::exit(1);
                }
            }
        }
    }

    let config = generate_client_config(&host, port);
    match serde_json::to_string_pretty(&config) {
        Ok(json) => {
            println!("{}", json);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("错误: JSON 转换失败: {}", e);
            std::process::exit(1);
        }
    }
}
