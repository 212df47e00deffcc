//! Declarative node shapes.
//!
//! A [`Template`] describes a subtree: the whole sheet layout when building a
//! document, or the shape of one item when a grid or tab set grows. Both
//! sides of a sync session build new items from the same template, so an
//! item created remotely has exactly the fields it had where it was created.

use crate::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Template {
    Leaf {
        #[serde(default)]
        value: Value,
    },
    Group {
        #[serde(default)]
        fields: Vec<FieldTemplate>,
    },
    Grid {
        columns: usize,
        #[serde(default)]
        item: Option<Box<Template>>,
    },
    Tabs {
        #[serde(default)]
        panel: Option<Box<Template>>,
    },
}

/// A named field inside a group template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTemplate {
    pub id: String,
    #[serde(flatten)]
    pub template: Template,
}

impl Template {
    pub fn leaf(value: impl Into<Value>) -> Self {
        Template::Leaf {
            value: value.into(),
        }
    }

    pub fn group<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Template)>,
        S: Into<String>,
    {
        Template::Group {
            fields: fields
                .into_iter()
                .map(|(id, template)| FieldTemplate {
                    id: id.into(),
                    template,
                })
                .collect(),
        }
    }

    pub fn grid(columns: usize, item: Template) -> Self {
        Template::Grid {
            columns,
            item: Some(Box::new(item)),
        }
    }

    pub fn tabs(panel: Template) -> Self {
        Template::Tabs {
            panel: Some(Box::new(panel)),
        }
    }

    /// Empty group, used for items of collections without a template.
    pub fn empty() -> Self {
        Template::Group { fields: Vec::new() }
    }
}
