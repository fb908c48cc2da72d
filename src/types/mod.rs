mod metadata;

pub use metadata::{normalize_name, parent_name, Metadata, TypeFlag, Xattr, MODE_MASK};
