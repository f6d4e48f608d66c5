// RemoteKit - 命令行入口

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use remotekit::settings::ClientSettings;
use remotekit::sftp::{FileAttributes, FileEntry, SftpClient};
use remotekit::ssh::{AuthMethod, ConnectionEvent, EventSink, SshConfig, SshConnection};
use remotekit::storage;
use remotekit::tree::{PathTree, TreeTraversal};

#[derive(Parser, Debug)]
#[command(name = "remotekit", version, about = "SSH 远程执行与 SFTP 文件传输")]
struct Cli {
    /// 目标主机
    #[arg(long)]
    host: String,

    /// 端口（默认取设置文件）
    #[arg(long)]
    port: Option<u16>,

    /// 用户名
    #[arg(long, short = 'u')]
    user: String,

    /// 私钥文件，不指定时使用密码认证
    #[arg(long)]
    key: Option<PathBuf>,

    /// 私钥密码
    #[arg(long, env = "REMOTEKIT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// 登录密码
    #[arg(long, env = "REMOTEKIT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// 服务器公钥指纹（SHA256:...）
    #[arg(long)]
    fingerprint: Option<String>,

    /// 设置文件路径，默认使用系统配置目录
    #[arg(long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 执行远程命令
    Exec {
        /// 命令内容
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
        /// 通过持久 shell 执行（保留工作目录等状态）
        #[arg(long)]
        shell: bool,
    },
    /// 列出远程目录
    Ls {
        #[arg(default_value = ".")]
        path: String,
    },
    /// 下载文件
    Get { remote: String, local: Option<PathBuf> },
    /// 上传文件
    Put { local: PathBuf, remote: String },
    /// 查看文件属性
    Stat { path: String },
    /// 创建目录
    Mkdir { path: String },
    /// 遍历远程目录树
    Tree {
        #[arg(default_value = ".")]
        path: String,
        /// 展开超大目录
        #[arg(long)]
        allow_large: bool,
        /// 任一目录失败即中止
        #[arg(long)]
        fail_fast: bool,
    },
}

impl Cli {
    fn ssh_config(&self, settings: &ClientSettings) -> Result<SshConfig> {
        let auth = match (&self.key, &self.password) {
            (Some(key_path), _) => AuthMethod::PublicKey {
                key_path: key_path.clone(),
                passphrase: self.passphrase.clone(),
            },
            (None, Some(password)) => AuthMethod::Password(password.clone()),
            (None, None) => bail!("Either --key or REMOTEKIT_PASSWORD is required"),
        };

        let mut config = SshConfig {
            host: self.host.clone(),
            port: self.port.unwrap_or(settings.connection.default_port),
            username: self.user.clone(),
            auth,
            host_key_fingerprint: self.fingerprint.clone(),
            ..Default::default()
        };
        settings.apply_to(&mut config);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug remotekit ...
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => storage::load_settings_from(path)?,
        None => storage::load_settings()?,
    };
    let config = cli.ssh_config(&settings)?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                ConnectionEvent::StageChanged(stage) => info!("{}", stage.label()),
                ConnectionEvent::Failed { error } => warn!("Connection failed: {}", error),
                ConnectionEvent::Disconnected { reason } => info!("Disconnected: {}", reason),
                _ => {}
            }
        }
    });

    let connection = SshConnection::new(config, EventSink::new(event_tx));
    connection.connect().await?;

    let result = run(&connection, &settings, cli.command).await;
    if let Err(e) = connection.close().await {
        warn!("Failed to close connection: {}", e);
    }
    result
}

async fn run(connection: &SshConnection, settings: &ClientSettings, command: Command) -> Result<()> {
    match command {
        Command::Exec { command, shell } => {
            let command = command.join(" ");
            let output = if shell {
                let mut channel = connection.create_shell().await?;
                let output = channel.execute(&command).await?;
                channel.close().await?;
                output
            } else {
                connection.exec(&command).await?
            };
            print!("{}", output.stdout_string());
            eprint!("{}", output.stderr_string());
            if !output.is_success() {
                bail!(
                    "Remote command exited with status {}",
                    output.exit_code.unwrap_or_default()
                );
            }
        }
        Command::Ls { path } => {
            let sftp = connection.create_file_transfer_client().await?;
            let path = sftp.realpath(&path).await?;
            for entry in sftp.list(&path).await? {
                println!("{}", format_entry(&entry));
            }
            shutdown_quietly(&sftp).await;
        }
        Command::Get { remote, local } => {
            let sftp = connection.create_file_transfer_client().await?;
            let data = sftp.get(&remote).await?;
            let local = match local {
                Some(path) => path,
                None => PathBuf::from(remote.rsplit('/').next().unwrap_or("download")),
            };
            tokio::fs::write(&local, &data)
                .await
                .with_context(|| format!("Unable to write {}", local.display()))?;
            info!("Downloaded {} bytes to {}", data.len(), local.display());
            shutdown_quietly(&sftp).await;
        }
        Command::Put { local, remote } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Unable to read {}", local.display()))?;
            let sftp = connection.create_file_transfer_client().await?;
            sftp.write_file(&remote, &data).await?;
            info!("Uploaded {} bytes to {}", data.len(), remote);
            shutdown_quietly(&sftp).await;
        }
        Command::Stat { path } => {
            let sftp = connection.create_file_transfer_client().await?;
            let attrs = sftp.stat(&path).await?;
            print_attrs(&path, &attrs);
            shutdown_quietly(&sftp).await;
        }
        Command::Mkdir { path } => {
            let sftp = connection.create_file_transfer_client().await?;
            sftp.mkdir(&path, FileAttributes::default()).await?;
            shutdown_quietly(&sftp).await;
        }
        Command::Tree {
            path,
            allow_large,
            fail_fast,
        } => {
            let sftp = connection.create_file_transfer_client().await?;
            let root = sftp.realpath(&path).await?;
            let mut policy = settings.traversal_policy();
            policy.allow_large_folders |= allow_large;
            policy.fail_fast |= fail_fast;

            let traversal = TreeTraversal::new(sftp.clone(), policy);
            let tree = traversal
                .run(&root, |tree, id| {
                    tracing::debug!("Loaded {}", tree.node(id).path);
                })
                .await?;
            print_tree(&tree);
            shutdown_quietly(&sftp).await;
        }
    }
    Ok(())
}

async fn shutdown_quietly(sftp: &SftpClient) {
    if let Err(e) = sftp.shutdown().await {
        warn!("Failed to close SFTP channel: {}", e);
    }
}

fn format_entry(entry: &FileEntry) -> String {
    if entry.longname.is_empty() {
        let suffix = if entry.is_directory() { "/" } else { "" };
        format!("{}{}", entry.filename, suffix)
    } else {
        entry.longname.clone()
    }
}

fn print_attrs(path: &str, attrs: &FileAttributes) {
    println!("path:        {}", path);
    if let Some(size) = attrs.size {
        println!("size:        {}", size);
    }
    if let Some(permissions) = attrs.permissions {
        println!("permissions: {:o}", permissions);
    }
    if let (Some(uid), Some(gid)) = (attrs.uid(), attrs.gid()) {
        println!("owner:       {}:{}", uid, gid);
    }
    if let Some(mtime) = attrs.mtime() {
        let time = chrono::DateTime::from_timestamp(mtime as i64, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("modified:    {}", time);
    }
}

fn print_tree(tree: &PathTree) {
    let mut stack = vec![(tree.root(), 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let node = tree.node(id);
        let name = if depth == 0 { node.path.as_str() } else { node.name() };
        let mut line = format!("{}{}", "  ".repeat(depth), name);
        if node.is_directory() && depth > 0 {
            line.push('/');
        }
        if let Some(error) = node.error() {
            line.push_str(&format!("  [error: {}]", error));
        } else if node.is_skipped() {
            line.push_str("  [skipped]");
        }
        println!("{}", line);
        for child in node.children().iter().rev() {
            stack.push((*child, depth + 1));
        }
    }
}
