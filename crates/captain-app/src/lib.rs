// Captain recommendation service.
//
// The binary in main.rs is a thin CLI over `Recommender`.

pub mod recommend;

pub use recommend::{CancelFlag, Recommender};
