/// Raw portal rows and the canonical events reconstructed from them
mod normalize;
mod types;

pub use normalize::{
    normalize_exam, parse_exam_time, NormalizeContext, NormalizedCourses, NormalizedExams,
};
pub use types::*;
