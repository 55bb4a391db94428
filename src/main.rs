//! dorm-epay-agent - 宿舍电费自动充值
//!
//! Usage:
//! - 充值默认房间: `dorm-epay-agent`
//! - 指定房间: `dorm-epay-agent --building C3 --room 302 --kwh 10`
//! - 充值本人宿舍: `dorm-epay-agent --own-room --kwh 10`
//! - 查电表: `dorm-epay-agent --query`
//! - 查历史账单: `dorm-epay-agent --history`

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{fmt, EnvFilter};

use dorm_epay_agent::config::env::{constants, EnvConfig};
use dorm_epay_agent::config::{PrefKind, PrefRecord, PrefStore};
use dorm_epay_agent::domain::auth::CaptchaChallenge;
use dorm_epay_agent::domain::meter::RoomIdentity;
use dorm_epay_agent::error::WorkflowError;
use dorm_epay_agent::infra::docker::DockerCli;
use dorm_epay_agent::services::portal::PortalFactory;
use dorm_epay_agent::services::tunnel::TunnelProvider;
use dorm_epay_agent::services::workflow::{
    CaptchaSolver, MeterRequest, Orchestrator, WorkflowOptions, WorkflowOutcome,
};

#[derive(Debug, Default)]
struct CliArgs {
    query: bool,
    history: bool,
    own_room: bool,
    remember: bool,
    building: Option<String>,
    room: Option<String>,
    kwh: Option<i64>,
}

/// 解析命令行参数，非法输入打印用法错误后以 2 退出
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    match parse_from(&args[1..]) {
        Ok(parsed) => parsed,
        Err(msg) => {
            eprintln!("{}", msg);
            eprintln!("用 --help 查看用法");
            std::process::exit(2);
        }
    }
}

fn parse_from(args: &[String]) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--query" => {
                parsed.query = true;
                i += 1;
            }
            "--history" => {
                parsed.history = true;
                i += 1;
            }
            "--own-room" => {
                parsed.own_room = true;
                i += 1;
            }
            "--remember" => {
                parsed.remember = true;
                i += 1;
            }
            "--building" => {
                parsed.building = Some(flag_value(args, i, "--building")?.to_string());
                i += 2;
            }
            "--room" => {
                parsed.room = Some(flag_value(args, i, "--room")?.to_string());
                i += 2;
            }
            "--kwh" => {
                let raw = flag_value(args, i, "--kwh")?;
                parsed.kwh = Some(
                    raw.parse()
                        .map_err(|_| format!("--kwh 需要一个整数，拿到的是 `{}`", raw))?,
                );
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

    Ok(parsed)
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 缺少参数值", flag))
}

fn print_help() {
    println!("dorm-epay-agent {} - 宿舍电费自动充值", constants::VERSION);
    println!();
    println!("USAGE:");
    println!("    dorm-epay-agent [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --query              只查电表状态，不充值");
    println!("    --history            只查历史充值账单");
    println!("    --building <CODE>    充值楼号代码，如 C3");
    println!("    --room <ROOM>        充值房间号");
    println!("    --own-room           充值本人宿舍（忽略楼号/房间号）");
    println!("    --kwh <N>            充值度数（正整数）");
    println!("    --remember           把本次解析出的账户与充值默认值存为偏好记录后退出");
    println!("    -h, --help           打印帮助");
    println!();
    println!("未给出的参数依次从环境变量和 data/ 下的偏好记录补齐。");
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).compact().init();
}

/// 命令行验证码通道：图片写到临时文件，答案从标准输入读
struct StdinCaptchaSolver;

#[async_trait]
impl CaptchaSolver for StdinCaptchaSolver {
    async fn solve(&mut self, challenge: &CaptchaChallenge) -> Result<String, WorkflowError> {
        let path = std::env::temp_dir().join("dorm-epay-captcha.jpg");
        if let Err(e) = std::fs::write(&path, &challenge.image) {
            return Err(WorkflowError::UnexpectedResponse(format!(
                "cannot save captcha image: {}",
                e
            )));
        }

        println!("验证码图片已保存到 {}", path.display());
        print!("请输入验证码: ");
        let _ = std::io::stdout().flush();

        let code = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .map_err(|e| WorkflowError::UnexpectedResponse(format!("captcha prompt failed: {}", e)))?
        .map_err(|e| WorkflowError::UnexpectedResponse(format!("captcha prompt failed: {}", e)))?;

        Ok(code.trim().to_string())
    }
}

/// 环境变量缺的字段用偏好记录补齐
fn merge_prefs(config: &mut EnvConfig) {
    let store = PrefStore::new(config.data_dir.clone());

    if config.portal.username.is_empty() || config.portal.password.is_empty() {
        if let Ok(Some(payer)) = store.load(PrefKind::Payer) {
            if config.portal.username.is_empty() {
                config.portal.username = payer.get("username").unwrap_or("").to_string();
            }
            if config.portal.password.is_empty() {
                config.portal.password = payer.get("password").unwrap_or("").to_string();
            }
        }
    }

    if config.tunnel.env.username.is_empty() || config.tunnel.env.password.is_empty() {
        if let Ok(Some(vpn)) = store.load(PrefKind::TunnelLogin) {
            if config.tunnel.env.username.is_empty() {
                config.tunnel.env.username = vpn.get("username").unwrap_or("").to_string();
            }
            if config.tunnel.env.password.is_empty() {
                config.tunnel.env.password = vpn.get("password").unwrap_or("").to_string();
            }
        }
    }

    if let Ok(Some(charge)) = store.load(PrefKind::DefaultCharge) {
        if config.charge.building_code.is_empty() {
            config.charge.building_code = charge.get("building_code").unwrap_or("").to_string();
        }
        if config.charge.room.is_empty() {
            config.charge.room = charge.get("room").unwrap_or("").to_string();
        }
        if let Some(amount) = charge.get("amount").and_then(|v| v.parse().ok()) {
            if config.charge.amount_kwh <= 0 {
                config.charge.amount_kwh = amount;
            }
        }
    }
}

/// 把当前解析出的账户与充值默认值写成偏好记录，下次运行可省去环境变量
fn remember_prefs(config: &EnvConfig) -> std::io::Result<()> {
    let store = PrefStore::new(config.data_dir.clone());

    let mut payer = PrefRecord::new(PrefKind::Payer);
    payer
        .set("username", config.portal.username.clone())
        .set("password", config.portal.password.clone());

    let mut vpn = PrefRecord::new(PrefKind::TunnelLogin);
    vpn.set("username", config.tunnel.env.username.clone())
        .set("password", config.tunnel.env.password.clone());

    let mut charge = PrefRecord::new(PrefKind::DefaultCharge);
    charge
        .set("building_code", config.charge.building_code.clone())
        .set("room", config.charge.room.clone())
        .set("amount", config.charge.amount_kwh.to_string());

    for record in [&payer, &vpn, &charge] {
        store.save(record)?;
        println!("已保存 {}", record.summary());
    }
    Ok(())
}

fn build_request(args: &CliArgs, config: &EnvConfig) -> MeterRequest {
    if args.query {
        return MeterRequest::Query;
    }
    if args.history {
        return MeterRequest::History;
    }

    let kwh = args.kwh.unwrap_or(config.charge.amount_kwh);
    let building = args
        .building
        .clone()
        .unwrap_or_else(|| config.charge.building_code.clone());
    let room = args.room.clone().unwrap_or_else(|| config.charge.room.clone());

    let target = if args.own_room || building.is_empty() || room.is_empty() {
        // 没给出完整房间标识就充给本人宿舍
        None
    } else {
        Some(RoomIdentity::new(building, room))
    };

    MeterRequest::Recharge { room: target, kwh }
}

fn print_outcome(outcome: &WorkflowOutcome) {
    match outcome {
        WorkflowOutcome::State(state) => {
            println!("剩余电量: {:.1} 度", state.remaining_kwh);
            println!("当前功率: {} W (限 {} W)", state.power_w, state.limit_w);
            println!("电压: {} V, 功率因数: {:.2}", state.voltage_v, state.power_factor);
            println!("累计充值 {} 次, 状态码 {}", state.recharges, state.state_code);
        }
        WorkflowOutcome::History(records) => {
            for r in records {
                println!(
                    "{}  单号 {}  {}  {:.2} 元  {} 度",
                    r.timestamp, r.order_id, r.kind, r.amount_money, r.quantity_kwh
                );
            }
            println!("共 {} 条记录", records.len());
        }
        WorkflowOutcome::Recharged(receipt) => {
            println!("充值完成！");
            println!("时间: {}", receipt.timestamp);
            println!("金额: {:.2} 元 ({} 度)", receipt.amount_money, receipt.quantity_kwh);
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = parse_args();
    let mut config = EnvConfig::from_env();
    merge_prefs(&mut config);

    if args.remember {
        if let Some(building) = &args.building {
            config.charge.building_code = building.clone();
        }
        if let Some(room) = &args.room {
            config.charge.room = room.clone();
        }
        if let Some(kwh) = args.kwh {
            config.charge.amount_kwh = kwh;
        }
        if let Err(e) = remember_prefs(&config) {
            eprintln!("偏好记录写入失败: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let request = build_request(&args, &config);

    let tunnel = TunnelProvider::new(&config.tunnel, DockerCli);
    let factory = PortalFactory::new(config.portal.clone());
    let options = WorkflowOptions {
        ready_timeout: config.tunnel.ready_timeout,
        post_login_delay: Duration::from_secs(config.portal.post_login_delay_secs),
        captcha_attempts: constants::CAPTCHA_MAX_ATTEMPTS,
    };
    let orchestrator = Orchestrator::new(tunnel, factory, options);

    let mut solver = StdinCaptchaSolver;
    match orchestrator.run(request, &mut solver).await {
        Ok(outcome) => print_outcome(&outcome),
        Err(e) => {
            eprintln!("[{}] {}", e.component().as_str(), e);
            std::process::exit(1);
        }
    }
}
