//! Tag for `ContentDelta` events: which stream a chunk of text belongs to.

use serde::{Deserialize, Serialize};

/// Which text stream a `ContentDelta` chunk belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Reasoning,
    Content,
}
