//! Expansion of `{{identity.*}}` directives against the caller's entity.
//!
//! Supported directives:
//!
//! - `identity.entity.id`, `identity.entity.name`
//! - `identity.entity.metadata.<key>`
//! - `identity.entity.aliases.<mount accessor>.id|name|metadata.<key>`
//! - `identity.groups.ids.<group id>.name|metadata.<key>`
//! - `identity.groups.names.<group name>.id|metadata.<key>`

use thiserror::Error;

use crate::context::Context;
use crate::error::{FrameworkError, Result};
use crate::system_view::{Entity, Group, SystemView};

/// Template parsing and lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unbalanced templating characters")]
    Unbalanced,
    #[error("string contains entity template directives but no entity was provided")]
    NoEntity,
    #[error("no value could be found for one of the template directives")]
    ValueNotFound,
    #[error("invalid template directive {0:?}")]
    InvalidDirective(String),
}

#[derive(Debug, PartialEq, Eq)]
enum Directive<'a> {
    EntityId,
    EntityName,
    EntityMetadata(&'a str),
    Alias { accessor: &'a str, field: AliasField<'a> },
    GroupById { id: &'a str, field: GroupField<'a> },
    GroupByName { name: &'a str, field: GroupField<'a> },
}

#[derive(Debug, PartialEq, Eq)]
enum AliasField<'a> {
    Id,
    Name,
    Metadata(&'a str),
}

#[derive(Debug, PartialEq, Eq)]
enum GroupField<'a> {
    Id,
    Name,
    Metadata(&'a str),
}

enum Piece<'a> {
    Text(&'a str),
    Directive(Directive<'a>),
}

fn parse_directive(raw: &str) -> std::result::Result<Directive<'_>, TemplateError> {
    let invalid = || TemplateError::InvalidDirective(raw.to_string());
    let rest = raw.strip_prefix("identity.").ok_or_else(invalid)?;

    if let Some(entity) = rest.strip_prefix("entity.") {
        return match entity {
            "id" => Ok(Directive::EntityId),
            "name" => Ok(Directive::EntityName),
            _ => {
                if let Some(key) = entity.strip_prefix("metadata.") {
                    return non_empty(key).map(Directive::EntityMetadata).ok_or_else(invalid);
                }
                let alias = entity.strip_prefix("aliases.").ok_or_else(invalid)?;
                let (accessor, field) = alias.split_once('.').ok_or_else(invalid)?;
                let field = match field {
                    "id" => AliasField::Id,
                    "name" => AliasField::Name,
                    _ => field
                        .strip_prefix("metadata.")
                        .and_then(non_empty)
                        .map(AliasField::Metadata)
                        .ok_or_else(invalid)?,
                };
                let accessor = non_empty(accessor).ok_or_else(invalid)?;
                Ok(Directive::Alias { accessor, field })
            }
        };
    }

    let groups = rest.strip_prefix("groups.").ok_or_else(invalid)?;
    let (by_id, selector) = if let Some(s) = groups.strip_prefix("ids.") {
        (true, s)
    } else if let Some(s) = groups.strip_prefix("names.") {
        (false, s)
    } else {
        return Err(invalid());
    };
    let (key, field) = selector.split_once('.').ok_or_else(invalid)?;
    let key = non_empty(key).ok_or_else(invalid)?;
    let field = match field {
        "id" if !by_id => GroupField::Id,
        "name" if by_id => GroupField::Name,
        _ => field
            .strip_prefix("metadata.")
            .and_then(non_empty)
            .map(GroupField::Metadata)
            .ok_or_else(invalid)?,
    };
    Ok(if by_id {
        Directive::GroupById { id: key, field }
    } else {
        Directive::GroupByName { name: key, field }
    })
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

fn parse(template: &str) -> std::result::Result<Vec<Piece<'_>>, TemplateError> {
    if template.matches("{{").count() != template.matches("}}").count() {
        return Err(TemplateError::Unbalanced);
    }

    let mut pieces = Vec::new();
    let mut chunks = template.split("{{");
    if let Some(head) = chunks.next() {
        pieces.push(Piece::Text(head));
    }
    for chunk in chunks {
        let mut parts = chunk.split("}}");
        let (Some(inner), Some(tail), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TemplateError::Unbalanced);
        };
        pieces.push(Piece::Directive(parse_directive(inner.trim())?));
        pieces.push(Piece::Text(tail));
    }
    Ok(pieces)
}

/// Checks a template's syntax.
///
/// Returns whether the template contains any identity directives.
///
/// # Example
///
/// ```
/// use vaultframe::identity_template::validate_identity_template;
///
/// assert_eq!(validate_identity_template("plain").unwrap(), false);
/// assert_eq!(validate_identity_template("user-{{identity.entity.name}}").unwrap(), true);
/// assert!(validate_identity_template("{{identity.entity.name}").is_err());
/// assert!(validate_identity_template("{{identity.bogus}}").is_err());
/// ```
pub fn validate_identity_template(template: &str) -> std::result::Result<bool, TemplateError> {
    let pieces = parse(template)?;
    Ok(pieces.iter().any(|p| matches!(p, Piece::Directive(_))))
}

fn lookup(
    directive: &Directive<'_>,
    entity: &Entity,
    groups: &[Group],
) -> std::result::Result<String, TemplateError> {
    let found = match directive {
        Directive::EntityId => non_empty(&entity.id).map(str::to_string),
        Directive::EntityName => non_empty(&entity.name).map(str::to_string),
        Directive::EntityMetadata(key) => entity.metadata.get(*key).cloned(),
        Directive::Alias { accessor, field } => entity
            .aliases
            .iter()
            .find(|a| a.mount_accessor == *accessor)
            .and_then(|alias| match field {
                AliasField::Id => Some(alias.id.clone()),
                AliasField::Name => Some(alias.name.clone()),
                AliasField::Metadata(key) => alias.metadata.get(*key).cloned(),
            }),
        Directive::GroupById { id, field } => groups
            .iter()
            .find(|g| g.id == *id)
            .and_then(|g| group_field(g, field)),
        Directive::GroupByName { name, field } => groups
            .iter()
            .find(|g| g.name == *name)
            .and_then(|g| group_field(g, field)),
    };
    found.ok_or(TemplateError::ValueNotFound)
}

fn group_field(group: &Group, field: &GroupField<'_>) -> Option<String> {
    match field {
        GroupField::Id => Some(group.id.clone()),
        GroupField::Name => Some(group.name.clone()),
        GroupField::Metadata(key) => group.metadata.get(*key).cloned(),
    }
}

/// Substitutes identity directives in `template` for the given entity.
///
/// # Errors
///
/// Fails with `"no entity found"` when the entity does not exist, and with a
/// [`TemplateError`] for malformed templates or values that cannot be found.
pub async fn populate_identity_template(
    ctx: &Context,
    template: &str,
    entity_id: &str,
    sys_view: &dyn SystemView,
) -> Result<String> {
    ctx.check()?;
    let pieces = parse(template)?;

    let entity = sys_view
        .entity_info(entity_id)
        .await?
        .ok_or_else(|| FrameworkError::User("no entity found".to_string()))?;
    ctx.check()?;
    let groups = sys_view.groups_for_entity(entity_id).await?;

    let mut out = String::with_capacity(template.len());
    for piece in &pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Directive(directive) => out.push_str(&lookup(directive, &entity, &groups)?),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_view::{Alias, StaticSystemView};
    use std::collections::BTreeMap;

    fn view() -> StaticSystemView {
        let entity = Entity {
            id: "ent-1".to_string(),
            name: "alice".to_string(),
            metadata: [("team".to_string(), "infra".to_string())].into(),
            aliases: vec![Alias {
                id: "alias-1".to_string(),
                name: "alice@corp".to_string(),
                mount_accessor: "auth_userpass_1234".to_string(),
                metadata: [("region".to_string(), "us-east".to_string())].into(),
                ..Alias::default()
            }],
            ..Entity::default()
        };
        let groups = vec![Group {
            id: "grp-1".to_string(),
            name: "admins".to_string(),
            metadata: BTreeMap::from([("level".to_string(), "3".to_string())]),
            ..Group::default()
        }];
        StaticSystemView::new()
            .with_entity(entity)
            .with_groups("ent-1", groups)
    }

    async fn render(template: &str) -> Result<String> {
        populate_identity_template(&Context::background(), template, "ent-1", &view()).await
    }

    #[tokio::test]
    async fn test_alias_metadata() {
        let out = render("{{identity.entity.aliases.auth_userpass_1234.metadata.region}}")
            .await
            .unwrap();
        assert_eq!(out, "us-east");
    }

    #[tokio::test]
    async fn test_entity_and_groups() {
        let out = render(
            "{{identity.entity.name}}/{{ identity.entity.id }}/{{identity.entity.metadata.team}}",
        )
        .await
        .unwrap();
        assert_eq!(out, "alice/ent-1/infra");

        let out = render("{{identity.groups.ids.grp-1.name}}:{{identity.groups.names.admins.metadata.level}}")
            .await
            .unwrap();
        assert_eq!(out, "admins:3");

        let out = render("id={{identity.groups.names.admins.id}}").await.unwrap();
        assert_eq!(out, "id=grp-1");
    }

    #[tokio::test]
    async fn test_missing_entity() {
        let err = populate_identity_template(
            &Context::background(),
            "{{identity.entity.id}}",
            "nobody",
            &view(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "no entity found");
    }

    #[tokio::test]
    async fn test_missing_values() {
        let err = render("{{identity.entity.metadata.nope}}").await.unwrap_err();
        assert!(matches!(err, FrameworkError::Template(TemplateError::ValueNotFound)));

        let err = render("{{identity.entity.aliases.other.name}}").await.unwrap_err();
        assert!(matches!(err, FrameworkError::Template(TemplateError::ValueNotFound)));
    }

    #[test]
    fn test_validate() {
        assert_eq!(validate_identity_template("static").unwrap(), false);
        assert_eq!(
            validate_identity_template("{{identity.entity.aliases.acc.metadata.k}}").unwrap(),
            true
        );
        assert_eq!(
            validate_identity_template("}}{{"),
            Err(TemplateError::Unbalanced)
        );
        assert!(matches!(
            validate_identity_template("{{identity.groups.ids.g.id}}"),
            Err(TemplateError::InvalidDirective(_))
        ));
        assert!(validate_identity_template("{{identity.entity.aliases.acc}}").is_err());
    }
}
