//! Key layout and value codec for remote image metadata.
//!
//! Keys look like `{prefix}/{group}/Images/{imageId}/Tags` or
//! `{prefix}/{group}/Images/{imageId}/Reactions/{reactionName}`; values are
//! JSON arrays that are always written whole.

use crate::catalog::ReactionValue;

const IMAGES_SEGMENT: &str = "Images";
const TAGS_FIELD: &str = "Tags";
const REACTIONS_FIELD: &str = "Reactions";

/// `{prefix}/{group}/Images/`
pub fn group_prefix(prefix: &str, group: &str) -> String {
    format!("{}/{}/{}/", prefix, group, IMAGES_SEGMENT)
}

/// `{prefix}/{group}/Images/{imageId}/`
pub fn image_prefix(prefix: &str, group: &str, image_id: &str) -> String {
    format!("{}{}/", group_prefix(prefix, group), image_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Tags,
    Reactions(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataKey {
    pub image_id: String,
    pub field: MetadataField,
}

impl MetadataKey {
    pub fn new(image_id: impl Into<String>, field: MetadataField) -> Self {
        Self {
            image_id: image_id.into(),
            field,
        }
    }

    /// Decode a full key that sits under `group_prefix`. Unknown fields and
    /// malformed keys yield `None`.
    pub fn parse(group_prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(group_prefix)?;
        let mut parts = rest.splitn(3, '/');

        let image_id = parts.next().filter(|id| !id.is_empty())?;
        let field = match (parts.next()?, parts.next()) {
            (TAGS_FIELD, None) => MetadataField::Tags,
            (REACTIONS_FIELD, Some(name)) if !name.is_empty() => {
                MetadataField::Reactions(name.to_string())
            }
            _ => return None,
        };

        Some(Self::new(image_id, field))
    }

    pub fn to_key(&self, prefix: &str, group: &str) -> String {
        let base = image_prefix(prefix, group, &self.image_id);
        match &self.field {
            MetadataField::Tags => format!("{}{}", base, TAGS_FIELD),
            MetadataField::Reactions(name) => format!("{}{}/{}", base, REACTIONS_FIELD, name),
        }
    }
}

/// A full replacement value for one metadata field of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    Tags(Vec<String>),
    Reactions {
        name: String,
        values: Vec<ReactionValue>,
    },
}

impl MetadataUpdate {
    pub fn decode(field: &MetadataField, value: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match field {
            MetadataField::Tags => MetadataUpdate::Tags(serde_json::from_slice(value)?),
            MetadataField::Reactions(name) => MetadataUpdate::Reactions {
                name: name.clone(),
                values: serde_json::from_slice(value)?,
            },
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            MetadataUpdate::Tags(tags) => serde_json::to_vec(tags),
            MetadataUpdate::Reactions { values, .. } => serde_json::to_vec(values),
        }
    }

    pub fn field(&self) -> MetadataField {
        match self {
            MetadataUpdate::Tags(_) => MetadataField::Tags,
            MetadataUpdate::Reactions { name, .. } => MetadataField::Reactions(name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "image-server/pets/Images/";

    #[test]
    fn test_parse_tags_key() {
        let key = MetadataKey::parse(PREFIX, "image-server/pets/Images/abc/Tags").unwrap();
        assert_eq!(key, MetadataKey::new("abc", MetadataField::Tags));
    }

    #[test]
    fn test_parse_reactions_key() {
        let key = MetadataKey::parse(PREFIX, "image-server/pets/Images/abc/Reactions/like").unwrap();
        assert_eq!(
            key,
            MetadataKey::new("abc", MetadataField::Reactions("like".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        assert!(MetadataKey::parse(PREFIX, "image-server/other/Images/abc/Tags").is_none());
        assert!(MetadataKey::parse(PREFIX, "image-server/pets/Images/abc").is_none());
        assert!(MetadataKey::parse(PREFIX, "image-server/pets/Images/abc/Tags/extra").is_none());
        assert!(MetadataKey::parse(PREFIX, "image-server/pets/Images/abc/Reactions").is_none());
        assert!(MetadataKey::parse(PREFIX, "image-server/pets/Images/abc/Ratings").is_none());
        assert!(MetadataKey::parse(PREFIX, "image-server/pets/Images//Tags").is_none());
    }

    #[test]
    fn test_to_key_layout() {
        let tags = MetadataKey::new("abc", MetadataField::Tags);
        assert_eq!(tags.to_key("image-server", "pets"), "image-server/pets/Images/abc/Tags");

        let likes = MetadataKey::new("abc", MetadataField::Reactions("like".to_string()));
        let encoded = likes.to_key("image-server", "pets");
        assert_eq!(encoded, "image-server/pets/Images/abc/Reactions/like");
        assert_eq!(MetadataKey::parse(PREFIX, &encoded), Some(likes));
    }

    #[test]
    fn test_reaction_values_keep_number_string_distinction() {
        let field = MetadataField::Reactions("like".to_string());
        let update = MetadataUpdate::decode(&field, br#"["42", 42, "heart"]"#).unwrap();
        assert_eq!(
            update,
            MetadataUpdate::Reactions {
                name: "like".to_string(),
                values: vec![
                    ReactionValue::Text("42".to_string()),
                    ReactionValue::Count(42),
                    ReactionValue::Text("heart".to_string()),
                ],
            }
        );
        assert_eq!(update.encode().unwrap(), br#"["42",42,"heart"]"#.to_vec());
    }

    #[test]
    fn test_reaction_values_reject_signed_and_fractional_numbers() {
        let field = MetadataField::Reactions("like".to_string());
        assert!(MetadataUpdate::decode(&field, b"[-1]").is_err());
        assert!(MetadataUpdate::decode(&field, b"[1.5]").is_err());
        assert!(MetadataUpdate::decode(&field, b"[true]").is_err());
    }

    #[test]
    fn test_tags_must_be_string_array() {
        assert!(MetadataUpdate::decode(&MetadataField::Tags, br#"["a","b"]"#).is_ok());
        assert!(MetadataUpdate::decode(&MetadataField::Tags, br#"[1]"#).is_err());
        assert!(MetadataUpdate::decode(&MetadataField::Tags, br#""a""#).is_err());
    }
}
