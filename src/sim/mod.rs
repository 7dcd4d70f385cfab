pub mod framework;
pub mod modules;
pub mod nodes;
