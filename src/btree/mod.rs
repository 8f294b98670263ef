mod node;
mod tree;

pub use node::{BAL, MAX_KEY, NODE_SIZE};
pub use tree::BPlusTree;
