use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Metadata attached to a tag. The only field the core consumes is the
/// maintenance horizon; events on triggers carrying the tag are suppressed
/// until it passes.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TagData {
    pub maintenance: Option<i64>,
}
