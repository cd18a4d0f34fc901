//! Merkle Search Tree implementation

pub mod cursor;
pub mod node;
pub mod tree;
pub mod util;

pub use cursor::{Direction, KeyRange, MstCursor};
pub use node::{NodeData, NodeEntry, TreeEntry};
pub use tree::{Mst, MstFuture};
