// RemoteKit - SSH 远程执行与 SFTP 文件传输核心库

pub mod constants;
pub mod settings;
pub mod sftp;
pub mod ssh;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod testing;
