pub mod error;
pub mod layout;
pub mod leaf;
pub mod internal;
pub mod header_page;
pub mod tree;
pub mod iterator;

pub use error::BTreeError;
pub use layout::PageCodec;
pub use tree::BPlusTree;
pub use iterator::TreeIterator;
