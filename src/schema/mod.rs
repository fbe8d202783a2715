//! Input document schemas
//!
//! Mapping documents (question→topic tables) and respondent tables, the two
//! shapes handed to the engine by the ingestion stage.

mod mapping_doc;
mod respondent;

pub use mapping_doc::*;
pub use respondent::*;
