// 广度优先目录遍历
//
// 按队列顺序逐个列出目录（一次只有一个列出请求在途），
// 受目录声明大小与子项数量上限约束。节点的全部子节点完成后该节点才算加载完成。

use std::collections::VecDeque;
use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::node::{NodeId, PathTree};
use crate::constants::{DEFAULT_MAX_CHILDREN, DEFAULT_MAX_DIRECTORY_SIZE};
use crate::sftp::{FileEntry, SftpClient, SftpError};

/// 遍历错误
#[derive(Debug, Error)]
pub enum TraversalError {
    /// 列出目录失败（仅 fail_fast 模式）
    #[error("Failed to list {path}: {source}")]
    Listing {
        path: String,
        #[source]
        source: SftpError,
    },
}

/// 遍历上限
#[derive(Debug, Clone)]
pub struct TraversalPolicy {
    /// 目录条目声明大小超过该值时不展开
    pub max_directory_size: u64,
    /// 子项数量超过该值时不展开
    pub max_children: usize,
    /// 允许展开超大目录
    pub allow_large_folders: bool,
    /// 任一目录列出失败即中止整个遍历；否则只放弃该分支
    pub fail_fast: bool,
}

impl Default for TraversalPolicy {
    fn default() -> Self {
        Self {
            max_directory_size: DEFAULT_MAX_DIRECTORY_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            allow_large_folders: false,
            fail_fast: false,
        }
    }
}

/// 列出目录子项
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    async fn list_children(&self, path: &str) -> Result<Vec<FileEntry>, SftpError>;
}

#[async_trait]
impl DirectoryLister for SftpClient {
    async fn list_children(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        self.list(path).await
    }
}

/// 用闭包实现的列出器
pub struct FnLister<F>(pub F);

#[async_trait]
impl<F, Fut> DirectoryLister for FnLister<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<FileEntry>, SftpError>> + Send,
{
    async fn list_children(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        (self.0)(path.to_string()).await
    }
}

/// 目录遍历
pub struct TreeTraversal<L> {
    lister: L,
    policy: TraversalPolicy,
}

impl<L: DirectoryLister> TreeTraversal<L> {
    pub fn new(lister: L, policy: TraversalPolicy) -> Self {
        Self { lister, policy }
    }

    pub fn policy(&self) -> &TraversalPolicy {
        &self.policy
    }

    /// 从 root_path 开始遍历，返回完整的树
    pub async fn run<F>(&self, root_path: &str, mut on_node_loaded: F) -> Result<PathTree, TraversalError>
    where
        F: FnMut(&PathTree, NodeId),
    {
        let name = root_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("/");
        let mut tree = PathTree::new(root_path, FileEntry::directory(name));
        self.crawl(&mut tree, &mut on_node_loaded).await?;
        Ok(tree)
    }

    /// 遍历已有的树，从上次中断处继续（已访问的节点跳过）
    pub async fn crawl<F>(&self, tree: &mut PathTree, on_node_loaded: &mut F) -> Result<(), TraversalError>
    where
        F: FnMut(&PathTree, NodeId),
    {
        // 节点按广度优先顺序进入 arena，未加载的节点即是剩余工作
        let mut queue: VecDeque<NodeId> = tree
            .iter()
            .filter(|(_, node)| !node.loaded)
            .map(|(id, _)| id)
            .collect();

        while let Some(id) = queue.pop_front() {
            if tree.node(id).visited {
                continue;
            }
            tree.node_mut(id).visited = true;

            let node = tree.node(id);
            if !node.is_directory() {
                self.complete(tree, id, on_node_loaded);
                continue;
            }

            if let Some(size) = node.entry.size().filter(|size| *size > self.policy.max_directory_size) {
                debug!("[Tree] Skipping {}: declared size {} exceeds limit", node.path, size);
                tree.node_mut(id).skipped = true;
                self.complete(tree, id, on_node_loaded);
                continue;
            }

            let path = node.path.clone();
            let children = match self.lister.list_children(&path).await {
                Ok(children) => children,
                Err(e) => {
                    if self.policy.fail_fast {
                        // 留给下一次 crawl 重试
                        tree.node_mut(id).visited = false;
                        return Err(TraversalError::Listing { path, source: e });
                    }
                    warn!("[Tree] Failed to list {}: {}", path, e);
                    let node = tree.node_mut(id);
                    node.error = Some(e.to_string());
                    node.skipped = true;
                    self.complete(tree, id, on_node_loaded);
                    continue;
                }
            };

            let mut children: Vec<FileEntry> = children
                .into_iter()
                .filter(|entry| !entry.is_dot_entry())
                .collect();

            if children.len() > self.policy.max_children && !self.policy.allow_large_folders {
                debug!(
                    "[Tree] Skipping {}: {} children exceeds limit {}",
                    path,
                    children.len(),
                    self.policy.max_children
                );
                tree.node_mut(id).skipped = true;
                self.complete(tree, id, on_node_loaded);
                continue;
            }

            if children.is_empty() {
                tree.node_mut(id).expected_children = Some(0);
                self.complete(tree, id, on_node_loaded);
                continue;
            }

            // 最近访问/修改的优先
            children.sort_by(|a, b| b.attrs.latest_time().cmp(&a.attrs.latest_time()));
            tree.node_mut(id).expected_children = Some(children.len());
            for entry in children {
                let child = tree.add_node(id, entry);
                queue.push_back(child);
            }
        }

        Ok(())
    }

    /// 标记节点加载完成，并向上检查父节点是否已收齐
    fn complete<F>(&self, tree: &mut PathTree, id: NodeId, on_node_loaded: &mut F)
    where
        F: FnMut(&PathTree, NodeId),
    {
        let mut current = id;
        loop {
            if tree.node(current).loaded {
                return;
            }
            tree.node_mut(current).loaded = true;
            if !tree.node(current).children().is_empty() {
                tree.sort_children(current);
            }
            on_node_loaded(tree, current);

            let Some(parent) = tree.node(current).parent else {
                return;
            };
            if !tree.attach_child(parent, current) {
                return;
            }
            current = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::attrs::FileAttributes;
    use crate::sftp::protocol::StatusCode;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn dir(name: &str) -> FileEntry {
        FileEntry::directory(name)
    }

    fn file(name: &str, mtime: u32) -> FileEntry {
        FileEntry::new(
            name,
            format!("-rw-r--r-- 1 u g 1 Jan 1 00:00 {}", name),
            FileAttributes::default().with_size(1).with_times(mtime, mtime),
        )
    }

    /// 内存目录表，同时记录列出顺序
    #[derive(Clone, Default)]
    struct MapLister {
        dirs: HashMap<String, Vec<FileEntry>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MapLister {
        fn with(mut self, path: &str, entries: Vec<FileEntry>) -> Self {
            self.dirs.insert(path.to_string(), entries);
            self
        }
    }

    #[async_trait]
    impl DirectoryLister for MapLister {
        async fn list_children(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
            self.calls.lock().unwrap().push(path.to_string());
            self.dirs.get(path).cloned().ok_or_else(|| SftpError::Status {
                code: StatusCode::PermissionDenied,
                message: "Permission denied".to_string(),
            })
        }
    }

    fn wide_tree() -> MapLister {
        let big: Vec<FileEntry> = (0..101).map(|i| file(&format!("f{:03}", i), i)).collect();
        MapLister::default()
            .with("/root", vec![dir("big")])
            .with("/root/big", big)
    }

    #[tokio::test]
    async fn test_large_folder_skipped() {
        let traversal = TreeTraversal::new(wide_tree(), TraversalPolicy::default());
        let tree = traversal.run("/root", |_, _| {}).await.unwrap();

        let big = tree.find("/root/big").unwrap();
        let node = tree.node(big);
        assert!(node.is_loaded());
        assert!(node.is_skipped());
        assert!(node.children().is_empty());
        assert!(tree.node(tree.root()).is_loaded());
        assert_eq!(tree.len(), 2);
    }

    #[tokio::test]
    async fn test_large_folder_allowed() {
        let policy = TraversalPolicy {
            allow_large_folders: true,
            ..Default::default()
        };
        let traversal = TreeTraversal::new(wide_tree(), policy);
        let tree = traversal.run("/root", |_, _| {}).await.unwrap();

        let big = tree.node(tree.find("/root/big").unwrap());
        assert!(!big.is_skipped());
        assert_eq!(big.children().len(), 101);
        // 加载完成后按名称排序
        assert_eq!(tree.node(big.children()[0]).name(), "f000");
        assert_eq!(tree.node(big.children()[100]).name(), "f100");
    }

    #[tokio::test]
    async fn test_oversized_directory_not_listed() {
        let mut huge = dir("proc");
        huge.attrs.size = Some(DEFAULT_MAX_DIRECTORY_SIZE + 1);
        let lister = MapLister::default()
            .with("/", vec![huge, dir("etc")])
            .with("/etc", vec![file("hosts", 1)]);
        let calls = lister.calls.clone();

        let tree = TreeTraversal::new(lister, TraversalPolicy::default())
            .run("/", |_, _| {})
            .await
            .unwrap();

        let proc = tree.node(tree.find("/proc").unwrap());
        assert!(proc.is_skipped() && proc.is_loaded() && proc.is_visited());
        assert_eq!(*calls.lock().unwrap(), vec!["/".to_string(), "/etc".to_string()]);
    }

    #[tokio::test]
    async fn test_callback_once_per_node_after_children() {
        let lister = MapLister::default()
            .with("/w", vec![dir("a"), file("x", 5)])
            .with("/w/a", vec![dir("b"), file("y", 1)])
            .with("/w/a/b", vec![file("z", 1)]);
        let mut order = Vec::new();

        let tree = TreeTraversal::new(lister, TraversalPolicy::default())
            .run("/w", |tree, id| {
                let node = tree.node(id);
                // 触发时所有子节点都已加载
                assert!(node.children().iter().all(|c| tree.node(*c).is_loaded()));
                order.push(node.path.clone());
            })
            .await
            .unwrap();

        assert_eq!(order.len(), tree.len());
        let mut unique = order.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), order.len());
        assert_eq!(order.last().map(String::as_str), Some("/w"));

        let root = tree.node(tree.root());
        let names: Vec<_> = root.children().iter().map(|c| tree.node(*c).name()).collect();
        assert_eq!(names, vec!["a", "x"]);
    }

    #[tokio::test]
    async fn test_breadth_first_listing_order() {
        let lister = MapLister::default()
            .with("/", vec![dir("a"), dir("b")])
            .with("/a", vec![dir("c")])
            .with("/b", vec![])
            .with("/a/c", vec![]);
        let calls = lister.calls.clone();

        TreeTraversal::new(lister, TraversalPolicy::default())
            .run("/", |_, _| {})
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], "/");
        assert_eq!(calls[3], "/a/c");
    }

    #[tokio::test]
    async fn test_failed_branch_marked_and_crawl_continues() {
        let lister = MapLister::default()
            .with("/h", vec![dir("locked"), dir("open")])
            .with("/h/open", vec![file("readme", 1)]);

        let tree = TreeTraversal::new(lister, TraversalPolicy::default())
            .run("/h", |_, _| {})
            .await
            .unwrap();

        let locked = tree.node(tree.find("/h/locked").unwrap());
        assert!(locked.is_skipped());
        assert!(locked.error().unwrap().contains("Permission denied"));
        assert!(tree.find("/h/open/readme").is_some());
        assert!(tree.node(tree.root()).is_loaded());
    }

    #[tokio::test]
    async fn test_fail_fast_aborts() {
        let lister = MapLister::default().with("/h", vec![dir("locked")]);
        let policy = TraversalPolicy {
            fail_fast: true,
            ..Default::default()
        };

        let result = TreeTraversal::new(lister, policy).run("/h", |_, _| {}).await;
        match result {
            Err(TraversalError::Listing { path, source }) => {
                assert_eq!(path, "/h/locked");
                assert_eq!(source.status_code(), Some(StatusCode::PermissionDenied));
            }
            Ok(_) => panic!("expected listing failure"),
        }
    }

    #[tokio::test]
    async fn test_crawl_resumes_after_fail_fast() {
        let policy = TraversalPolicy {
            fail_fast: true,
            ..Default::default()
        };
        let broken = MapLister::default()
            .with("/h", vec![dir("a"), dir("b")])
            .with("/h/b", vec![file("x", 1)]);
        let fixed = broken.clone().with("/h/a", vec![file("y", 1)]);

        let mut tree = PathTree::new("/h", dir("h"));
        let mut loaded = Vec::new();
        let mut on_loaded = |tree: &PathTree, id: NodeId| loaded.push(tree.node(id).path.clone());

        let first = TreeTraversal::new(broken, policy.clone())
            .crawl(&mut tree, &mut on_loaded)
            .await;
        assert!(matches!(first, Err(TraversalError::Listing { .. })));
        let a = tree.find("/h/a").unwrap();
        assert!(!tree.node(a).is_visited());
        assert!(!tree.node(tree.root()).is_loaded());

        TreeTraversal::new(fixed, policy)
            .crawl(&mut tree, &mut on_loaded)
            .await
            .unwrap();

        assert!(tree.iter().all(|(_, node)| node.is_loaded()));
        assert!(tree.find("/h/a/y").is_some());
        assert!(tree.find("/h/b/x").is_some());
        assert_eq!(tree.node(tree.root()).children().len(), 2);

        let mut paths = loaded.clone();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), loaded.len());
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.last().map(String::as_str), Some("/h"));
    }

    #[tokio::test]
    async fn test_crawl_on_loaded_tree_does_nothing() {
        let lister = MapLister::default().with("/d", vec![file("f", 1)]);
        let calls = lister.calls.clone();
        let traversal = TreeTraversal::new(lister, TraversalPolicy::default());

        let mut tree = traversal.run("/d", |_, _| {}).await.unwrap();
        let mut fired = 0;
        traversal
            .crawl(&mut tree, &mut |_: &PathTree, _: NodeId| fired += 1)
            .await
            .unwrap();
        assert_eq!(fired, 0);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closure_lister_filters_dot_entries() {
        let lister = FnLister(|path: String| async move {
            assert_eq!(path, "/d");
            Ok::<_, SftpError>(vec![dir("."), dir(".."), file("only", 1)])
        });
        let tree = TreeTraversal::new(lister, TraversalPolicy::default())
            .run("/d", |_, _| {})
            .await
            .unwrap();
        assert_eq!(tree.node(tree.root()).children().len(), 1);
    }
}
