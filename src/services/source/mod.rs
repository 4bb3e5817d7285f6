pub mod directory;

pub use directory::DirectorySource;
