pub mod aggregate;
pub mod detect;
pub mod duplicate;
pub mod hash;
pub mod merge;
pub mod ranking;
pub mod scoring;
pub mod tree;
