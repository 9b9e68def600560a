pub mod export;
pub mod llm;
pub mod normalize;
pub mod prompt;
pub mod retry;
pub mod roadmap;
pub mod search;
