pub mod averages;
pub mod catalog;
pub mod core;
pub mod grades;
pub mod setup;
pub mod sync;
