// Configuration fragments on disk
mod loader;

pub use loader::{
    load, merge_fragments, parse_fragment, read_fragment, read_fragments, store_merged, Fragment,
    MERGED_CONFIG_FILE,
};
