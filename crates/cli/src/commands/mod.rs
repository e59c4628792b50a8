pub mod baselines;
pub mod distributions;
pub mod merge;
pub mod traces;
pub mod workspace;

pub use baselines::*;
pub use distributions::*;
pub use merge::*;
pub use traces::*;
pub use workspace::*;
