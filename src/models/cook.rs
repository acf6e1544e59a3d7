use serde::{Deserialize, Serialize};

use crate::models::location::{Location, RawLocation};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CookRef {
    pub id: u64,
    pub name: Option<String>,
    pub location: Option<Location>,
}

/// The server sends the cook either as a bare id (number or string) or as an
/// embedded object. Resolved once into a [`CookRef`] when an order is decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawCook {
    Id(u64),
    IdText(String),
    Embedded(EmbeddedCook),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EmbeddedCook {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub location: Option<RawLocation>,
}

impl RawCook {
    pub fn resolve(self) -> Result<CookRef, String> {
        match self {
            RawCook::Id(id) => Ok(CookRef {
                id,
                name: None,
                location: None,
            }),
            RawCook::IdText(text) => text
                .trim()
                .parse::<u64>()
                .map(|id| CookRef {
                    id,
                    name: None,
                    location: None,
                })
                .map_err(|err| format!("invalid cook id {text:?}: {err}")),
            RawCook::Embedded(cook) => Ok(CookRef {
                id: cook.id,
                name: cook.name.or(cook.username),
                location: cook.location.and_then(RawLocation::into_location),
            }),
        }
    }
}

/// Picks the richest of the `cook` / `cook_id` fields.
pub(crate) fn resolve_cook(
    cook: Option<RawCook>,
    cook_id: Option<RawCook>,
) -> Result<Option<CookRef>, String> {
    let embedded = cook.map(RawCook::resolve).transpose()?;
    let bare = cook_id.map(RawCook::resolve).transpose()?;

    Ok(match (embedded, bare) {
        (Some(a), Some(b)) if a.name.is_none() && a.location.is_none() && b.name.is_some() => {
            Some(b)
        }
        (Some(a), _) => Some(a),
        (None, b) => b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawCook {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn bare_numeric_and_text_ids_resolve() {
        assert_eq!(raw("7").resolve().unwrap().id, 7);
        assert_eq!(raw(r#""12""#).resolve().unwrap().id, 12);
        assert!(raw(r#""abc""#).resolve().is_err());
    }

    #[test]
    fn embedded_object_keeps_name_and_location() {
        let cook = raw(
            r#"{"id": 3, "username": "amma", "location": {"latitude": 9.66, "longitude": 80.02}}"#,
        )
        .resolve()
        .unwrap();
        assert_eq!(cook.id, 3);
        assert_eq!(cook.name.as_deref(), Some("amma"));
        assert!(cook.location.is_some());
    }

    #[test]
    fn embedded_cook_wins_over_bare_id() {
        let resolved = resolve_cook(
            Some(raw(r#"{"id": 3, "name": "Kamala"}"#)),
            Some(raw("3")),
        )
        .unwrap()
        .unwrap();
        assert_eq!(resolved.name.as_deref(), Some("Kamala"));

        let only_id = resolve_cook(None, Some(raw("9"))).unwrap().unwrap();
        assert_eq!(only_id.id, 9);
        assert!(resolve_cook(None, None).unwrap().is_none());
    }
}
