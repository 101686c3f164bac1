pub mod client;
pub mod parse;
pub mod tutor;

pub use client::OpenAiTutor;
pub use tutor::{Tutor, TutorBackend, default_exercises};
