//! XJP Expose Agent - 容器工作负载公网暴露代理
//!
//! Usage:
//! - Normal mode: `xjp-expose-agent`
//! - With custom port: `xjp-expose-agent --port 19999`

use xjp_expose_agent::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                if config.port_override.is_none() {
                    eprintln!("Ignoring invalid --port value: {}", args[i + 1]);
                }
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("XJP Expose Agent - 容器工作负载公网暴露代理");
    println!();
    println!("USAGE:");
    println!("    xjp-expose-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    PORT                     Listening port (default 9876)");
    println!("    WORKLOAD_PORT_LOW/HIGH   Workload port range (default 3000-3010)");
    println!("    TUNNEL_COMMAND           Tunnel executable (default npx)");
    println!("    TUNNEL_ARGS              Tunnel arguments (default \"lt --port {{port}}\")");
    println!("    HIBERNATE_ALL_MATCHES    Stop every matching container on hibernate");
}

fn main() {
    let config = parse_args();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };
    rt.block_on(async {
        xjp_expose_agent::init_and_run_agent_with_config(config).await;
    });
}
