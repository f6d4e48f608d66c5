// 目录树节点
//
// 节点存放在一个 Vec 中，用下标引用；每个节点维护子节点名称到下标的索引，
// 按路径查找时逐级查表，不需要遍历字符串。

use std::collections::HashMap;

use crate::sftp::types::{join_path, FileEntry};

/// 节点下标，只在所属的 PathTree 内有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 目录树节点
#[derive(Debug, Clone)]
pub struct PathNode {
    /// 文件条目
    pub entry: FileEntry,
    /// 完整路径
    pub path: String,
    pub parent: Option<NodeId>,
    /// 已完成的子节点（加载完成后按目录优先、名称排序）
    children: Vec<NodeId>,
    child_index: HashMap<String, NodeId>,
    /// 列出目录后记录的子节点数量
    pub(crate) expected_children: Option<usize>,
    pub(crate) visited: bool,
    pub(crate) loaded: bool,
    pub(crate) skipped: bool,
    pub(crate) error: Option<String>,
}

impl PathNode {
    fn new(entry: FileEntry, path: String, parent: Option<NodeId>) -> Self {
        Self {
            entry,
            path,
            parent,
            children: Vec::new(),
            child_index: HashMap::new(),
            expected_children: None,
            visited: false,
            loaded: false,
            skipped: false,
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.filename
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_directory(&self) -> bool {
        self.entry.is_directory()
    }

    pub fn is_visited(&self) -> bool {
        self.visited
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// 因大小或子项数量超限而未展开，或列出失败
    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    /// 列出该目录时的错误
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// 目录树
#[derive(Debug, Clone)]
pub struct PathTree {
    nodes: Vec<PathNode>,
}

impl PathTree {
    /// 以给定路径和条目创建只有根节点的树
    pub fn new(root_path: impl Into<String>, entry: FileEntry) -> Self {
        Self {
            nodes: vec![PathNode::new(entry, root_path.into(), None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&PathNode> {
        self.nodes.get(id.0)
    }

    /// 按下标取节点，下标必须来自本树
    pub fn node(&self, id: NodeId) -> &PathNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PathNode {
        &mut self.nodes[id.0]
    }

    /// 新建子节点并登记到父节点的名称索引（尚未进入 children 列表）
    pub(crate) fn add_node(&mut self, parent: NodeId, entry: FileEntry) -> NodeId {
        let id = NodeId(self.nodes.len());
        let path = join_path(&self.node(parent).path, &entry.filename);
        let name = entry.filename.clone();
        self.nodes.push(PathNode::new(entry, path, Some(parent)));
        self.node_mut(parent).child_index.insert(name, id);
        id
    }

    /// 把已完成的子节点挂到父节点，返回父节点是否已收齐
    pub(crate) fn attach_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let node = self.node_mut(parent);
        node.children.push(child);
        node.expected_children == Some(node.children.len())
    }

    /// 子节点排序：目录在前，其余按名称
    pub(crate) fn sort_children(&mut self, id: NodeId) {
        let mut children = std::mem::take(&mut self.node_mut(id).children);
        children.sort_by(|a, b| {
            let (a, b) = (&self.node(*a).entry, &self.node(*b).entry);
            b.is_directory()
                .cmp(&a.is_directory())
                .then_with(|| a.filename.cmp(&b.filename))
        });
        self.node_mut(id).children = children;
    }

    /// 按名称查找直接子节点
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent).child_index.get(name).copied()
    }

    /// 按完整路径查找节点
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let root = self.node(self.root());
        let root_path = root.path.trim_end_matches('/');
        let path = path.trim_end_matches('/');

        let rest = if path == root_path {
            ""
        } else if root_path.is_empty() {
            // 根为 "/"
            path.strip_prefix('/')?
        } else {
            path.strip_prefix(root_path)?.strip_prefix('/')?
        };

        rest.split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self.root(), |id, part| self.child(id, part))
    }

    /// 所有节点
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PathNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index), node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::attrs::FileAttributes;

    fn file(name: &str) -> FileEntry {
        FileEntry::new(name, format!("-rw-r--r-- 1 u g 0 Jan 1 00:00 {}", name), FileAttributes::default())
    }

    #[test]
    fn test_add_and_find() {
        let mut tree = PathTree::new("/srv", FileEntry::directory("srv"));
        let app = tree.add_node(tree.root(), FileEntry::directory("app"));
        let log = tree.add_node(app, file("log.txt"));

        assert_eq!(tree.node(log).path, "/srv/app/log.txt");
        assert_eq!(tree.find("/srv/app/log.txt"), Some(log));
        assert_eq!(tree.find("/srv/app/"), Some(app));
        assert_eq!(tree.find("/srv"), Some(tree.root()));
        assert_eq!(tree.find("/srv/missing"), None);
        assert_eq!(tree.find("/other/app"), None);
        // 前缀相同但不是子路径
        assert_eq!(tree.find("/srvx/app"), None);
    }

    #[test]
    fn test_find_from_filesystem_root() {
        let mut tree = PathTree::new("/", FileEntry::directory("/"));
        let etc = tree.add_node(tree.root(), FileEntry::directory("etc"));
        assert_eq!(tree.node(etc).path, "/etc");
        assert_eq!(tree.find("/etc"), Some(etc));
        assert_eq!(tree.find("/"), Some(tree.root()));
    }

    #[test]
    fn test_attach_and_sort_children() {
        let mut tree = PathTree::new("/r", FileEntry::directory("r"));
        let root = tree.root();
        let b = tree.add_node(root, file("b"));
        let a = tree.add_node(root, file("a"));
        let dir = tree.add_node(root, FileEntry::directory("z"));
        tree.node_mut(root).expected_children = Some(3);

        assert!(!tree.attach_child(root, b));
        assert!(!tree.attach_child(root, dir));
        assert!(tree.attach_child(root, a));

        tree.sort_children(root);
        assert_eq!(tree.node(root).children(), &[dir, a, b]);
    }
}
