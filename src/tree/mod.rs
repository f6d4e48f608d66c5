// 远程目录树遍历

pub mod node;
pub mod traversal;

pub use node::{NodeId, PathNode, PathTree};
pub use traversal::{DirectoryLister, FnLister, TraversalError, TraversalPolicy, TreeTraversal};
