//! Plain-text help for the backend root and for individual paths.

use crate::path::Path;

const NO_SYNOPSIS: &str = "<no synopsis>";
const NO_DESCRIPTION: &str = "<no description>";

fn indent(width: usize, text: &str) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        placeholder
    } else {
        trimmed
    }
}

/// Help text for one path, answered to `Help` on a matching request path.
///
/// Parameters are listed alphabetically with their kind names.
pub(crate) fn path_help_text(request_path: &str, path: &Path) -> String {
    let mut out = format!(
        "Request:        {request_path}\nMatching Route: {}\n\n{}\n\n",
        path.pattern,
        or_placeholder(&path.help_synopsis, NO_SYNOPSIS)
    );

    if !path.fields.is_empty() {
        out.push_str("## PARAMETERS\n");
        // FieldMap is ordered by name.
        for (name, schema) in path.fields.iter() {
            let description = or_placeholder(&schema.description, NO_DESCRIPTION);
            let description = if schema.deprecated {
                format!("(DEPRECATED) {description}")
            } else {
                description.to_string()
            };
            out.push_str(&format!(
                "\n{} ({})\n{}\n",
                indent(4, name),
                schema.kind,
                indent(8, &description)
            ));
        }
        out.push('\n');
    }

    out.push_str("## DESCRIPTION\n\n");
    out.push_str(or_placeholder(&path.help_description, NO_DESCRIPTION));
    out.push('\n');
    out
}

/// Help text for the backend root.
///
/// `routes` pairs each anchored routing pattern with its path's synopsis.
pub(crate) fn root_help_text(help: &str, routes: &[(String, String)]) -> String {
    let mut out = format!(
        "## DESCRIPTION\n\n{}\n\n## PATHS\n\n\
         The following paths are supported by this backend. To view help for\n\
         any of the paths below, use the help command with any route matching\n\
         the path pattern. Note that depending on the policy of your auth token,\n\
         you may or may not be able to access certain paths.\n\n",
        help.trim()
    );
    for (pattern, synopsis) in routes {
        out.push_str(&indent(4, pattern));
        out.push('\n');
        out.push_str(&indent(8, synopsis.trim()));
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, FieldSchema};

    #[test]
    fn test_path_help_lists_fields_alphabetically() {
        let path = Path::new("roles/(?P<name>.+)")
            .with_field("ttl", FieldSchema::new(FieldKind::DurationSecond).with_description("Lease TTL"))
            .with_field("name", FieldSchema::new(FieldKind::NameString).with_description("Role name"))
            .with_field("old", FieldSchema::new(FieldKind::String).deprecated())
            .with_help(" Manage roles ", "Roles describe\nissued credentials.");

        let text = path_help_text("roles/web", &path);
        assert!(text.starts_with("Request:        roles/web\nMatching Route: roles/(?P<name>.+)\n\nManage roles\n"));

        let name = text.find("    name (name string)").unwrap();
        let old = text.find("    old (string)").unwrap();
        let ttl = text.find("    ttl (duration (sec))").unwrap();
        assert!(name < old && old < ttl);
        assert!(text.contains("        (DEPRECATED) <no description>"));
        assert!(text.ends_with("## DESCRIPTION\n\nRoles describe\nissued credentials.\n"));
    }

    #[test]
    fn test_path_help_placeholders() {
        let text = path_help_text("x", &Path::new("x"));
        assert!(text.contains("<no synopsis>"));
        assert!(!text.contains("## PARAMETERS"));
        assert!(text.ends_with("<no description>\n"));
    }

    #[test]
    fn test_root_help() {
        let routes = vec![
            ("^config$".to_string(), " Configure the backend ".to_string()),
            ("^creds/(?P<name>.+)$".to_string(), "Issue credentials".to_string()),
        ];
        let text = root_help_text("The demo backend.\n", &routes);
        assert!(text.starts_with("## DESCRIPTION\n\nThe demo backend.\n\n## PATHS\n"));
        assert!(text.contains("    ^config$\n        Configure the backend\n\n"));
        assert!(text.contains("    ^creds/(?P<name>.+)$\n        Issue credentials\n"));
    }
}
