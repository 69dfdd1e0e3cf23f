//! Fee category metadata.
//!
//! The category catalog itself lives outside this service; ledger and
//! template items carry a category reference plus a typed metadata variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optional campus service a fee category can be tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Hostel,
    Mess,
    Transport,
    Library,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Hostel => "hostel",
            ServiceKind::Mess => "mess",
            ServiceKind::Transport => "transport",
            ServiceKind::Library => "library",
        }
    }
}

/// Typed per-category metadata carried on fee items.
///
/// Service-linked variants gate whether an item applies to a student at all;
/// `Custom` covers admin-defined categories with free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryMeta {
    Hostel {
        #[serde(skip_serializing_if = "Option::is_none")]
        room_type: Option<String>,
    },
    Mess {
        #[serde(skip_serializing_if = "Option::is_none")]
        meal_plan: Option<String>,
    },
    Transport {
        #[serde(skip_serializing_if = "Option::is_none")]
        route: Option<String>,
    },
    Library,
    Custom {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<String, String>,
    },
}

impl CategoryMeta {
    /// Plain admin-defined category with no extra fields.
    pub fn custom() -> Self {
        CategoryMeta::Custom {
            fields: BTreeMap::new(),
        }
    }

    /// The campus service this category is tied to, if any.
    pub fn service(&self) -> Option<ServiceKind> {
        match self {
            CategoryMeta::Hostel { .. } => Some(ServiceKind::Hostel),
            CategoryMeta::Mess { .. } => Some(ServiceKind::Mess),
            CategoryMeta::Transport { .. } => Some(ServiceKind::Transport),
            CategoryMeta::Library => Some(ServiceKind::Library),
            CategoryMeta::Custom { .. } => None,
        }
    }
}

impl Default for CategoryMeta {
    fn default() -> Self {
        CategoryMeta::custom()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_linked_variants_map_to_their_service() {
        assert_eq!(
            CategoryMeta::Hostel { room_type: None }.service(),
            Some(ServiceKind::Hostel)
        );
        assert_eq!(CategoryMeta::Library.service(), Some(ServiceKind::Library));
        assert_eq!(CategoryMeta::custom().service(), None);
    }

    #[test]
    fn meta_round_trips_with_kind_tag() {
        let meta = CategoryMeta::Transport {
            route: Some("north-campus".to_string()),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "transport");
        assert_eq!(json["route"], "north-campus");
        let back: CategoryMeta = serde_json::from_value(json).unwrap();
        assert_eq!(back, meta);
    }
}
