//! Data structures for hurdle model fitting.

mod design_matrix;
mod formula;
mod random_effects;
mod table;

pub use design_matrix::{DesignMatrix, INTERCEPT};
pub use formula::{Formula, Term};
pub use random_effects::{RandomDesignMatrix, RandomEffect};
pub use table::{LongTable, Variable, VariableType};
