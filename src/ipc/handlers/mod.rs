pub mod assessments;
pub mod core;
pub mod directory;
pub mod results;
pub mod roster;
