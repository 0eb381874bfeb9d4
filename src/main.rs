use anyhow::Context;
use clap::{Parser, Subcommand};
use pan123_rust::config::DEFAULT_CONFIG_PATH;
use pan123_rust::remote::PathResolution;
use pan123_rust::uploader::RapidPayload;
use pan123_rust::{logging, AppConfig, BatchReport, DownloadResult, Pan123, PanError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 中断退出码（与 shell 的 SIGINT 约定一致）
const EXIT_INTERRUPTED: u8 = 130;

/// 123 云盘命令行客户端
///
/// 凭证从环境变量读取：PAN123TOKEN / PAN123TOKEN_EXPIREDAT，
/// 或 PAN123CLIENTID / PAN123CLIENTSECRET
#[derive(Parser, Debug)]
#[command(name = "pan123")]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 下载文件或文件夹，多个路径用逗号分隔（同名时优先按文件夹处理）
    Download {
        #[arg(value_delimiter = ',', required = true)]
        paths: Vec<String>,
        /// 本地保存目录
        #[arg(short = 'o', long = "output", default_value = ".")]
        output: PathBuf,
        /// 覆盖本地已存在的文件
        #[arg(long)]
        overwrite: bool,
    },

    /// 下载单个文件
    DownloadFile {
        path: String,
        #[arg(short = 'o', long = "output", default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },

    /// 下载整个文件夹，多个路径用逗号分隔
    DownloadDir {
        #[arg(value_delimiter = ',', required = true)]
        paths: Vec<String>,
        #[arg(short = 'o', long = "output", default_value = ".")]
        output: PathBuf,
        #[arg(long)]
        overwrite: bool,
    },

    /// 上传单个文件到远程目录
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "/")]
        remote_dir: String,
    },

    /// 上传图片到图床
    UploadImage {
        file: PathBuf,
        /// 图床目录ID，省略时为图床根目录
        #[arg(long, default_value = "")]
        parent: String,
    },

    /// 上传本地文件夹到远程目录下，多个文件夹用逗号分隔
    UploadDir {
        #[arg(value_delimiter = ',', required = true)]
        dirs: Vec<PathBuf>,
        #[arg(long, default_value = "/")]
        remote_dir: String,
    },

    /// 解析远程路径，输出条目信息
    Resolve {
        path: String,
        /// 按文件夹解析
        #[arg(long)]
        dir: bool,
    },

    /// 列出远程子树
    Tree {
        #[arg(default_value = "/")]
        path: String,
        /// 把遍历结果以 JSON 写入该文件
        #[arg(long)]
        json: Option<PathBuf>,
    },

    /// 逐级创建远程目录
    Mkdir { path: String },

    /// 从 JSON 文件导入秒传
    RapidImport {
        file: PathBuf,
        /// 导入到的远程目录
        #[arg(long, default_value = "/")]
        dir: String,
    },

    /// 导出远程子树的秒传 JSON
    RapidExport {
        path: String,
        /// 输出文件，省略时打印到标准输出
        out: Option<PathBuf>,
    },

    /// 保存目录列表快照
    Snapshot {
        path: String,
        #[arg(default_value = "snapshots")]
        out_dir: PathBuf,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 输出批量结果；有失败项时返回错误
fn finish_batch<T: Serialize>(what: &str, report: &BatchReport<T>) -> anyhow::Result<()> {
    print_json(report)?;
    for (name, reason) in report.failures() {
        warn!("{}失败: {}: {}", what, name, reason);
    }
    if !report.is_complete() {
        anyhow::bail!("{}: {} 项失败, 共 {} 项", what, report.failed, report.total);
    }
    Ok(())
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    tokio::fs::write(path, serde_json::to_vec_pretty(value)?)
        .await
        .with_context(|| format!("写入文件失败: {}", path.display()))
}

/// 依次处理多个目标；单个目标失败时继续，中断立即返回
async fn for_each_target<T, F, Fut>(targets: Vec<T>, mut op: F) -> anyhow::Result<()>
where
    T: std::fmt::Debug,
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let total = targets.len();
    let mut failed = 0usize;
    for target in targets {
        let label = format!("{:?}", target);
        if let Err(e) = op(target).await {
            if is_interrupt(&e) {
                return Err(e);
            }
            error!("{} 处理失败: {:#}", label, e);
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{}/{} 个目标失败", failed, total);
    }
    Ok(())
}

async fn run(cli: Cli, pan: Pan123) -> anyhow::Result<()> {
    let pan = &pan;
    match cli.command {
        Command::Download {
            paths,
            output,
            overwrite,
        } => {
            for_each_target(paths, |path| {
                let output = output.clone();
                async move {
                    match pan.download(&path, &output, overwrite).await? {
                        DownloadResult::File(status) => print_json(&status),
                        DownloadResult::Directory(report) => finish_batch("下载", &report),
                    }
                }
            })
            .await
        }
        Command::DownloadFile {
            path,
            output,
            overwrite,
        } => print_json(&pan.download_file(&path, &output, overwrite).await?),
        Command::DownloadDir {
            paths,
            output,
            overwrite,
        } => {
            for_each_target(paths, |path| {
                let output = output.clone();
                async move {
                    let report = pan.download_directory(&path, &output, overwrite).await?;
                    finish_batch("下载", &report)
                }
            })
            .await
        }
        Command::Upload { file, remote_dir } => {
            print_json(&pan.upload_file(&file, &remote_dir).await?)
        }
        Command::UploadImage { file, parent } => {
            print_json(&pan.upload_image(&file, &parent).await?)
        }
        Command::UploadDir { dirs, remote_dir } => {
            for_each_target(dirs, |dir| {
                let remote_dir = remote_dir.clone();
                async move {
                    let report = pan.upload_directory(&dir, &remote_dir).await?;
                    finish_batch("上传", &report)
                }
            })
            .await
        }
        Command::Resolve { path, dir } => match pan.resolve(&path, dir).await? {
            PathResolution::Found { entry, .. } => print_json(&entry),
            PathResolution::NotFound => Err(PanError::NotFound(path).into()),
        },
        Command::Tree { path, json } => {
            let outcome = pan.list_tree(&path).await?;
            match json {
                Some(out) => {
                    write_json(&out, &outcome).await?;
                    info!("已写入 {} 个条目到 {}", outcome.entries.len(), out.display());
                }
                None => {
                    for entry in &outcome.entries {
                        let marker = if entry.is_dir() { "/" } else { "" };
                        println!("{}{}", entry.full_path, marker);
                    }
                }
            }
            if !outcome.is_complete() {
                anyhow::bail!("{} 个目录未能遍历", outcome.failures.len());
            }
            Ok(())
        }
        Command::Mkdir { path } => {
            let id = pan.ensure_directory(&path).await?;
            println!("{}", id);
            Ok(())
        }
        Command::RapidImport { file, dir } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("读取秒传文件失败: {}", file.display()))?;
            let payload = RapidPayload::from_json_str(&text)?;
            let report = pan.rapid_import(payload, &dir).await?;
            print_json(&report)?;
            if report.failure_count > 0 {
                anyhow::bail!(
                    "秒传导入: {} 项失败, {} 项成功",
                    report.failure_count,
                    report.success_count
                );
            }
            Ok(())
        }
        Command::RapidExport { path, out } => {
            let export = pan.rapid_export(&path).await?;
            match out {
                Some(out) => {
                    write_json(&out, &export).await?;
                    info!("已导出 {} 个文件到 {}", export.files.len(), out.display());
                    Ok(())
                }
                None => print_json(&export),
            }
        }
        Command::Snapshot { path, out_dir } => {
            let report = pan.snapshot_tree(&path, &out_dir).await?;
            print_json(&report)?;
            if !report.failures.is_empty() {
                anyhow::bail!("{} 个目录未能保存快照", report.failures.len());
            }
            Ok(())
        }
    }
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PanError>()
        .map_or(false, PanError::is_interrupt)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config).await;

    // 必须保持 _log_guard 存活
    let _log_guard = logging::init_logging(&config.log);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("收到 Ctrl+C，正在中断...");
                cancel.cancel();
            }
        });
    }

    let pan = match Pan123::from_config(config, cancel) {
        Ok(pan) => pan,
        Err(e) => {
            error!("初始化失败: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, pan).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_interrupt(&e) => {
            warn!("操作已中断");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
