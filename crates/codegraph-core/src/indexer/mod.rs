pub mod diff;
pub mod entities;
pub mod extractor;
pub mod filesystem;
pub mod imports;
pub mod parser;
pub mod resolution;
pub mod updater;
