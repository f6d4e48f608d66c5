// 协议与默认值常量

/// 默认连接超时（秒）
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// 默认子通道创建超时（秒）
pub const DEFAULT_CHANNEL_TIMEOUT_SECS: u64 = 15;

/// 默认 SFTP 请求超时（秒）
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shell 命令结束标记
/// 每条命令之后分别向标准输出和标准错误各打印一次，不会出现在正常输出中
pub const SHELL_SENTINEL_TOKEN: &str = "__RK_CMD_DONE_5b1f0c9e__";

/// 单次 READ 请求的数据块大小
pub const SFTP_READ_CHUNK: u32 = 32 * 1024;

/// 单次 WRITE 请求的数据块大小
pub const SFTP_WRITE_CHUNK: usize = 32 * 1024;

/// 目录遍历：目录条目声明大小上限（字节）
pub const DEFAULT_MAX_DIRECTORY_SIZE: u64 = 1024 * 1024;

/// 目录遍历：单个目录子项数量上限
pub const DEFAULT_MAX_CHILDREN: usize = 100;
