pub mod assessments;
pub mod assignments;
pub mod core;
pub mod reports;
pub mod roster;
pub mod summary;
pub mod terms;
pub mod weighting;
