pub mod copy;
pub mod read;
pub mod walk;
pub mod write;

pub use copy::{apply_filters, copy_tree, CopyOptions};
pub use read::{read_metadata, read_symlink_target, read_xattrs, typeflag_of};
pub use walk::{scan_tree, walk_tree};
pub use write::{
    apply_metadata, create_file, create_hardlink, create_node, create_parents, mkdir_placeholders,
    remove_tree,
};
