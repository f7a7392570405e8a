pub mod openai;
pub mod traits;
pub mod util;

pub use openai::{OpenAi, OpenAiPromptBuilder};
pub use traits::{Agent, PromptBuilder};
pub use util::truncate_to_char_boundary;
