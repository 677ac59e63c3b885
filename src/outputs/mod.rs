//! Report output.
//!
//! The pipeline's only artifact is the [`DailyReport`](crate::models::DailyReport)
//! serialized as JSON; rendering it to HTML or Markdown happens elsewhere.
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── 2025-07-19.json
//! └── 2025-07-20.json
//! ```

pub mod json;
